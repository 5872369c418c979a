//! Tunable timings and host-specific constants, loadable from TOML.
//!
//! Every delay here was tuned empirically against one host page's load
//! behaviour. Only the shape matters to the algorithms: retry schedules are
//! front-loaded and then widen.

use crate::QmError;
use crate::QmResult;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuietConfig {
    pub scheduler: SchedulerConfig,
    pub navigation: NavigationConfig,
    pub store: StoreConfig,
}

impl QuietConfig {
    pub fn from_toml_str(input: &str) -> QmResult<Self> {
        let config: Self = toml::from_str(input).map_err(|error| {
            QmError::new(
                "config.parse_failed",
                format!("invalid configuration: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> QmResult<Self> {
        let content = fs::read_to_string(path).map_err(|error| {
            QmError::new(
                "config.read_failed",
                format!("failed to read config `{}`: {error}", path.display()),
            )
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> QmResult<()> {
        self.scheduler.validate()?;
        self.navigation.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Quiet period after the last mutation before an apply pass.
    pub apply_debounce_ms: u64,
    /// Delays after apply-mode activation at which extra apply passes run.
    pub apply_retry_schedule_ms: Vec<u64>,
    /// Safety-net re-apply period; 0 disables it.
    pub periodic_apply_ms: u64,
    pub restore_debounce_ms: u64,
    /// Minimum spacing between observer-triggered restore passes.
    pub restore_min_interval_ms: u64,
    /// Re-check period while the primary media element is buffering.
    pub media_poll_ms: u64,
    /// Restore retries when restore mode starts during a URL's initial load.
    pub initial_restore_schedule_ms: Vec<u64>,
    /// Restore retries when restore mode starts on an already settled page.
    pub toggle_restore_schedule_ms: Vec<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            apply_debounce_ms: 500,
            apply_retry_schedule_ms: vec![100, 300, 500, 1000, 2000, 3000, 5000],
            periodic_apply_ms: 3000,
            restore_debounce_ms: 300,
            restore_min_interval_ms: 1000,
            media_poll_ms: 250,
            initial_restore_schedule_ms: vec![
                250, 500, 1000, 1500, 2000, 3000, 4000, 6000, 8000, 10000,
            ],
            toggle_restore_schedule_ms: vec![0, 100, 300, 500, 1000, 2000, 3000],
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> QmResult<()> {
        if self.apply_debounce_ms == 0 || self.restore_debounce_ms == 0 {
            return Err(QmError::new(
                "config.debounce_invalid",
                "debounce windows must be greater than zero",
            ));
        }

        if self.media_poll_ms == 0 {
            return Err(QmError::new(
                "config.media_poll_invalid",
                "media_poll_ms must be greater than zero",
            ));
        }

        for (name, schedule) in [
            ("apply_retry_schedule_ms", &self.apply_retry_schedule_ms),
            ("initial_restore_schedule_ms", &self.initial_restore_schedule_ms),
            ("toggle_restore_schedule_ms", &self.toggle_restore_schedule_ms),
        ] {
            if schedule.windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(QmError::new(
                    "config.schedule_unsorted",
                    format!("{name} must be in non-decreasing order"),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NavigationConfig {
    pub host: String,
    pub home_paths: Vec<String>,
    /// Path that counts as home only when the query string is empty.
    pub bare_feed_path: String,
    pub redirect_destination: String,
    pub url_poll_ms: u64,
    pub logo_watch_ms: u64,
    /// Period of the navbar watch that keeps the toggle affordance mounted.
    pub navbar_watch_ms: u64,
    pub storage_retry_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            host: "www.youtube.com".to_owned(),
            home_paths: vec![
                "/".to_owned(),
                String::new(),
                "/index.html".to_owned(),
                "/feed".to_owned(),
            ],
            bare_feed_path: "/feed/".to_owned(),
            redirect_destination: "https://yt-search-bar.web.app".to_owned(),
            url_poll_ms: 500,
            logo_watch_ms: 1000,
            navbar_watch_ms: 1000,
            storage_retry_ms: 1000,
        }
    }
}

impl NavigationConfig {
    pub fn destination_url(&self) -> QmResult<Url> {
        Url::parse(&self.redirect_destination).map_err(|error| {
            QmError::new(
                "config.destination_invalid",
                format!(
                    "redirect destination `{}` is not a valid URL: {error}",
                    self.redirect_destination
                ),
            )
        })
    }

    pub fn validate(&self) -> QmResult<()> {
        if self.host.trim().is_empty() {
            return Err(QmError::new("config.host_missing", "navigation host is empty"));
        }

        if self.url_poll_ms == 0 || self.logo_watch_ms == 0 || self.navbar_watch_ms == 0 {
            return Err(QmError::new(
                "config.watch_interval_invalid",
                "navigation watch intervals must be greater than zero",
            ));
        }

        self.destination_url().map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub key: String,
    pub default_enabled: bool,
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key: "noDistractionsEnabled".to_owned(),
            default_enabled: true,
            request_timeout_ms: 1000,
        }
    }
}
