//! Shared primitives used across QuietMode crates.

pub mod config;
pub mod time;

use thiserror::Error;
use url::Url;

pub use config::QuietConfig;
pub use time::Millis;
pub use time::TimerId;
pub use time::TimerQueue;

/// Result alias used across the workspace.
pub type QmResult<T> = Result<T, QmError>;

/// Workspace error: a stable dotted code plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct QmError {
    pub code: &'static str,
    pub message: String,
}

impl QmError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The "suppression enabled" preference as seen by one page instance.
///
/// `Unknown` is the state between attach and the first successful read of the
/// persisted value. Nothing mutates the DOM while the flag is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FlagState {
    #[default]
    Unknown,
    Enabled,
    Disabled,
}

impl FlagState {
    pub fn from_bool(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Enabled => Some(true),
            Self::Disabled => Some(false),
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }

    pub fn is_disabled(self) -> bool {
        self == Self::Disabled
    }
}

/// Classification of the page a content instance is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    /// Video page on the host (`/watch...`).
    Watch,
    /// Recognised home/feed path on the host.
    Home,
    /// Search results on the host.
    Search,
    /// Any other path on the host.
    Other,
    /// The quiet destination the home page redirects to.
    QuietApp,
    /// Anything that is neither the host nor the quiet destination.
    Foreign,
}

impl PageKind {
    /// Pages where reconciliation runs at all.
    pub fn is_target(self) -> bool {
        matches!(self, Self::Watch | Self::Home | Self::Search | Self::Other)
    }

    pub fn is_watch(self) -> bool {
        self == Self::Watch
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Watch => "watch",
            Self::Home => "home",
            Self::Search => "search",
            Self::Other => "other",
            Self::QuietApp => "quiet-app",
            Self::Foreign => "foreign",
        }
    }
}

/// Last observed URL and whether the current URL is still in its initial load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    pub last_known_url: Url,
    pub initial_load: bool,
}

impl NavigationState {
    pub fn new(url: Url) -> Self {
        Self {
            last_known_url: url,
            initial_load: true,
        }
    }

    /// Records a URL change. Returns false when the URL is unchanged.
    pub fn record_url(&mut self, url: &Url) -> bool {
        if self.last_known_url == *url {
            return false;
        }
        self.last_known_url = url.clone();
        self.initial_load = true;
        true
    }

    /// Marks the initial load as consumed; later mode entries count as toggles.
    pub fn consume_initial_load(&mut self) -> bool {
        std::mem::replace(&mut self.initial_load, false)
    }
}

/// Per-page context shared by every component of one attached page instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub flag: FlagState,
    pub page: PageKind,
    pub navigation: NavigationState,
    pub now: Millis,
}

impl SessionContext {
    pub fn new(url: Url, page: PageKind) -> Self {
        Self {
            flag: FlagState::Unknown,
            page,
            navigation: NavigationState::new(url),
            now: Millis::ZERO,
        }
    }
}
