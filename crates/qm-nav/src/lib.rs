//! Navigation watcher: single-page-app URL changes, home arrivals and
//! home-logo interception.

use qm_core::PageKind;
use qm_core::QmResult;
use qm_core::SessionContext;
use qm_core::config::NavigationConfig;
use qm_dom::Document;
use qm_dom::NodeId;
use qm_dom::parse_selector;
use tracing::debug;
use tracing::info;
use url::Url;

const LOGO_SELECTOR: &str = "ytd-topbar-logo-renderer, a#logo";
const LOGO_RENDERER_TAG: &str = "ytd-topbar-logo-renderer";
const LOGO_IDS: &[&str] = &["logo", "logo-container"];
const LOGO_CLASS: &str = "logo";
const MAX_LOGO_DEPTH: usize = 10;

/// Why the quiet destination was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectReason {
    HomeArrival,
    LogoClick,
}

/// Performs a full navigation away from the host page.
pub trait Redirector {
    fn redirect(&mut self, destination: &Url, reason: RedirectReason);
}

/// Redirector that only remembers what it was asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingRedirector {
    pub redirects: Vec<(Url, RedirectReason)>,
}

impl Redirector for RecordingRedirector {
    fn redirect(&mut self, destination: &Url, reason: RedirectReason) {
        self.redirects.push((destination.clone(), reason));
    }
}

/// How the page learned about a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryEvent {
    PushState,
    ReplaceState,
    PopState,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationOutcome {
    pub url_changed: bool,
    pub page: PageKind,
    pub redirected: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherState {
    /// Logo element the interception is attached to.
    pub logo: Option<NodeId>,
    pub logo_attachments: u64,
    /// A redirect was issued for the current URL.
    pub redirect_pending: bool,
}

pub fn is_home_path(config: &NavigationConfig, url: &Url) -> bool {
    let path = url.path();
    if config.home_paths.iter().any(|home| home == path) {
        return true;
    }
    path == config.bare_feed_path && url.query().is_none_or(str::is_empty)
}

pub fn classify_url(config: &NavigationConfig, url: &Url) -> PageKind {
    let Some(host) = url.host_str() else {
        return PageKind::Foreign;
    };

    let quiet_host = config
        .destination_url()
        .ok()
        .and_then(|destination| destination.host_str().map(str::to_owned));
    if quiet_host.as_deref() == Some(host) {
        return PageKind::QuietApp;
    }
    if host != config.host {
        return PageKind::Foreign;
    }

    let path = url.path();
    if path.starts_with("/watch") {
        PageKind::Watch
    } else if is_home_path(config, url) {
        PageKind::Home
    } else if path.starts_with("/results") {
        PageKind::Search
    } else {
        PageKind::Other
    }
}

#[derive(Debug, Clone)]
pub struct NavigationWatcher {
    config: NavigationConfig,
    destination: Url,
    state: WatcherState,
}

impl NavigationWatcher {
    pub fn new(config: NavigationConfig) -> QmResult<Self> {
        let destination = config.destination_url()?;
        Ok(Self {
            config,
            destination,
            state: WatcherState::default(),
        })
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    pub fn destination(&self) -> &Url {
        &self.destination
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn classify(&self, url: &Url) -> PageKind {
        classify_url(&self.config, url)
    }

    /// Handles a history API call or popstate. Home arrival is checked on
    /// every event, not only on URL changes.
    pub fn on_history(
        &mut self,
        ctx: &mut SessionContext,
        event: HistoryEvent,
        url: &Url,
        redirector: &mut dyn Redirector,
    ) -> NavigationOutcome {
        let url_changed = self.record(ctx, url);
        if url_changed {
            debug!(event = ?event, url = %url, page = ctx.page.as_str(), "url changed");
        }
        let redirected = self.check_home(ctx, redirector);
        NavigationOutcome {
            url_changed,
            page: ctx.page,
            redirected,
        }
    }

    /// Polling fallback for navigations that bypass the history API.
    pub fn poll(
        &mut self,
        ctx: &mut SessionContext,
        current: &Url,
        redirector: &mut dyn Redirector,
    ) -> NavigationOutcome {
        if ctx.navigation.last_known_url == *current {
            return NavigationOutcome {
                url_changed: false,
                page: ctx.page,
                redirected: false,
            };
        }
        self.on_history(ctx, HistoryEvent::Poll, current, redirector)
    }

    /// Redirects to the quiet destination when the flag is enabled and the
    /// current URL is a home path on the host. At most once per URL.
    pub fn check_home(&mut self, ctx: &SessionContext, redirector: &mut dyn Redirector) -> bool {
        if !ctx.flag.is_enabled() || ctx.page != PageKind::Home || self.state.redirect_pending {
            return false;
        }
        self.state.redirect_pending = true;
        info!(
            from = %ctx.navigation.last_known_url,
            to = %self.destination,
            "home arrival redirected"
        );
        redirector.redirect(&self.destination, RedirectReason::HomeArrival);
        true
    }

    /// Capture-phase click handling. Returns true when the click was consumed
    /// and turned into a redirect.
    pub fn on_click(
        &mut self,
        doc: &Document,
        ctx: &SessionContext,
        target: NodeId,
        redirector: &mut dyn Redirector,
    ) -> bool {
        if !ctx.flag.is_enabled() || !self.is_logo_click(doc, target) {
            return false;
        }
        info!(to = %self.destination, "logo click redirected");
        redirector.redirect(&self.destination, RedirectReason::LogoClick);
        true
    }

    /// Re-attaches the logo interception when the host replaced the logo
    /// element. Returns true when a new element was picked up.
    pub fn watch_logo(&mut self, doc: &Document) -> bool {
        let current = doc.select(LOGO_SELECTOR).ok().flatten();
        if current == self.state.logo {
            return false;
        }
        self.state.logo = current;
        if current.is_none() {
            return false;
        }
        self.state.logo_attachments = self.state.logo_attachments.saturating_add(1);
        debug!(logo = ?current, "logo interception attached");
        true
    }

    fn record(&mut self, ctx: &mut SessionContext, url: &Url) -> bool {
        if !ctx.navigation.record_url(url) {
            return false;
        }
        ctx.page = self.classify(url);
        self.state.redirect_pending = false;
        true
    }

    fn is_logo_click(&self, doc: &Document, target: NodeId) -> bool {
        if let Some(logo) = self.state.logo {
            if doc.is_inclusive_ancestor(logo, target) {
                return true;
            }
        }

        let renderer = parse_selector(LOGO_RENDERER_TAG).ok();
        let mut current = Some(target);
        for _ in 0..MAX_LOGO_DEPTH {
            let Some(node_id) = current else {
                break;
            };
            if let Some(element) = doc.element(node_id) {
                let is_logo = element.tag() == LOGO_RENDERER_TAG
                    || element
                        .element_id()
                        .is_some_and(|id| LOGO_IDS.contains(&id))
                    || element.has_class_name(LOGO_CLASS)
                    || renderer
                        .as_ref()
                        .is_some_and(|selector| doc.closest(node_id, selector).is_some());
                if is_logo {
                    return true;
                }
            }
            current = doc.parent(node_id);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryEvent;
    use super::NavigationWatcher;
    use super::RecordingRedirector;
    use super::RedirectReason;
    use super::classify_url;
    use super::is_home_path;
    use qm_core::FlagState;
    use qm_core::PageKind;
    use qm_core::SessionContext;
    use qm_core::config::NavigationConfig;
    use qm_dom::Document;
    use qm_dom::NodeId;
    use qm_html::HtmlParser;
    use url::Url;

    const MASTHEAD: &str = r#"<html><body><ytd-masthead>
        <div id="start"><ytd-topbar-logo-renderer><a id="logo" href="/"><span id="logo-icon"><svg-icon></svg-icon></span></a></ytd-topbar-logo-renderer></div>
        <div id="center"><input id="search"></div>
    </ytd-masthead></body></html>"#;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap_or_else(|_| unreachable!())
    }

    fn watcher() -> NavigationWatcher {
        let watcher = NavigationWatcher::new(NavigationConfig::default());
        assert!(watcher.is_ok());
        watcher.unwrap_or_else(|_| unreachable!())
    }

    fn watch_context(flag: FlagState) -> SessionContext {
        let mut ctx = SessionContext::new(url("https://www.youtube.com/watch?v=abc"), PageKind::Watch);
        ctx.flag = flag;
        ctx
    }

    fn node(doc: &Document, selector: &str) -> NodeId {
        doc.select(selector)
            .ok()
            .flatten()
            .unwrap_or_else(|| unreachable!())
    }

    #[test]
    fn classifies_host_paths() {
        let config = NavigationConfig::default();
        assert_eq!(classify_url(&config, &url("https://www.youtube.com/watch?v=1")), PageKind::Watch);
        assert_eq!(classify_url(&config, &url("https://www.youtube.com/")), PageKind::Home);
        assert_eq!(classify_url(&config, &url("https://www.youtube.com/feed")), PageKind::Home);
        assert_eq!(
            classify_url(&config, &url("https://www.youtube.com/results?search_query=rust")),
            PageKind::Search
        );
        assert_eq!(classify_url(&config, &url("https://www.youtube.com/@channel")), PageKind::Other);
        assert_eq!(classify_url(&config, &url("https://yt-search-bar.web.app/")), PageKind::QuietApp);
        assert_eq!(classify_url(&config, &url("https://example.com/")), PageKind::Foreign);
    }

    #[test]
    fn bare_feed_path_is_home_only_without_query() {
        let config = NavigationConfig::default();
        assert!(is_home_path(&config, &url("https://www.youtube.com/feed/")));
        assert!(!is_home_path(&config, &url("https://www.youtube.com/feed/?x=1")));
        assert!(!is_home_path(&config, &url("https://www.youtube.com/feed/subscriptions")));
    }

    #[test]
    fn push_state_to_home_redirects_once_when_enabled() {
        let mut watcher = watcher();
        let mut ctx = watch_context(FlagState::Enabled);
        let mut redirector = RecordingRedirector::default();
        let home = url("https://www.youtube.com/");

        let outcome = watcher.on_history(&mut ctx, HistoryEvent::PushState, &home, &mut redirector);
        assert!(outcome.url_changed);
        assert!(outcome.redirected);
        assert_eq!(outcome.page, PageKind::Home);

        watcher.poll(&mut ctx, &home, &mut redirector);
        watcher.on_history(&mut ctx, HistoryEvent::ReplaceState, &home, &mut redirector);
        assert_eq!(redirector.redirects.len(), 1);
        assert_eq!(redirector.redirects[0].1, RedirectReason::HomeArrival);
        assert_eq!(redirector.redirects[0].0.as_str(), "https://yt-search-bar.web.app/");
    }

    #[test]
    fn push_state_to_home_does_nothing_when_disabled() {
        let mut watcher = watcher();
        let mut ctx = watch_context(FlagState::Disabled);
        let mut redirector = RecordingRedirector::default();

        let outcome = watcher.on_history(
            &mut ctx,
            HistoryEvent::PushState,
            &url("https://www.youtube.com/"),
            &mut redirector,
        );
        assert!(outcome.url_changed);
        assert!(!outcome.redirected);
        assert!(redirector.redirects.is_empty());
        assert!(ctx.navigation.initial_load);
    }

    #[test]
    fn poll_detects_changes_the_history_hooks_missed() {
        let mut watcher = watcher();
        let mut ctx = watch_context(FlagState::Disabled);
        let mut redirector = RecordingRedirector::default();

        let same = watcher.poll(&mut ctx, &url("https://www.youtube.com/watch?v=abc"), &mut redirector);
        assert!(!same.url_changed);

        let moved = watcher.poll(&mut ctx, &url("https://www.youtube.com/watch?v=xyz"), &mut redirector);
        assert!(moved.url_changed);
        assert_eq!(moved.page, PageKind::Watch);
    }

    #[test]
    fn logo_clicks_redirect_only_when_enabled() {
        let doc = HtmlParser.parse(MASTHEAD);
        let mut watcher = watcher();
        let mut redirector = RecordingRedirector::default();
        let icon = node(&doc, "svg-icon");
        let search = node(&doc, "#search");

        let disabled = watch_context(FlagState::Disabled);
        assert!(!watcher.on_click(&doc, &disabled, icon, &mut redirector));

        let enabled = watch_context(FlagState::Enabled);
        assert!(!watcher.on_click(&doc, &enabled, search, &mut redirector));
        assert!(watcher.on_click(&doc, &enabled, icon, &mut redirector));
        assert_eq!(redirector.redirects.len(), 1);
        assert_eq!(redirector.redirects[0].1, RedirectReason::LogoClick);
    }

    #[test]
    fn logo_watch_reattaches_after_replacement() {
        let mut doc = HtmlParser.parse(MASTHEAD);
        let mut watcher = watcher();
        assert!(watcher.watch_logo(&doc));
        assert!(!watcher.watch_logo(&doc));

        let old = node(&doc, "ytd-topbar-logo-renderer");
        let fresh = doc.create_element("ytd-topbar-logo-renderer");
        assert!(doc.replace(old, fresh).is_ok());

        assert!(watcher.watch_logo(&doc));
        assert_eq!(watcher.state().logo, Some(fresh));
        assert_eq!(watcher.state().logo_attachments, 2);
    }
}
