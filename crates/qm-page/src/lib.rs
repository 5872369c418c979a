//! One attached page instance: owns the per-page context and wires the
//! preference mirror, scheduler, navigation watcher and toggle affordance to
//! a single cooperative event loop on the virtual clock.

mod affordance;
mod router;

pub use affordance::TOGGLE_BUTTON_ID;
pub use affordance::TOGGLE_ICON_ID;
pub use affordance::ToggleAffordance;
pub use router::InstanceId;
pub use router::RouterAction;
pub use router::ToggleRouter;

use qm_core::FlagState;
use qm_core::Millis;
use qm_core::PageKind;
use qm_core::QmError;
use qm_core::QmResult;
use qm_core::QuietConfig;
use qm_core::SessionContext;
use qm_core::TimerQueue;
use qm_dom::Document;
use qm_dom::NodeId;
use qm_dom::ObserverId;
use qm_dom::ObserverInit;
use qm_ipc::ExtensionMessage;
use qm_ipc::LocalEndpoint;
use qm_nav::HistoryEvent;
use qm_nav::NavigationOutcome;
use qm_nav::NavigationWatcher;
use qm_nav::RecordingRedirector;
use qm_nav::Redirector;
use qm_presentation::detect_theme;
use qm_presentation::present;
use qm_scheduler::Mode;
use qm_scheduler::Scheduler;
use qm_storage::PreferenceMirror;
use qm_storage::PreferenceStore;
use qm_surfaces::SuppressionEngine;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

const THEME_ATTRIBUTES: &[&str] = &["dark", "class"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageTask {
    UrlPoll,
    LogoWatch,
    NavbarWatch,
    StorageRetry,
}

#[derive(Debug)]
pub struct Page<R: Redirector = RecordingRedirector> {
    doc: Document,
    ctx: SessionContext,
    config: QuietConfig,
    location: Url,
    mirror: PreferenceMirror,
    scheduler: Scheduler,
    navigation: NavigationWatcher,
    affordance: ToggleAffordance,
    endpoint: Option<LocalEndpoint>,
    redirector: R,
    timers: TimerQueue<PageTask>,
    theme_observers: Vec<ObserverId>,
    attached: bool,
}

impl<R: Redirector> Page<R> {
    /// Attaches to a loaded document. Host pages and the quiet destination
    /// are supported; anything else is refused.
    pub fn attach(
        doc: Document,
        url: Url,
        config: QuietConfig,
        store: Arc<dyn PreferenceStore>,
        endpoint: Option<LocalEndpoint>,
        redirector: R,
    ) -> QmResult<Self> {
        config.validate()?;
        let navigation = NavigationWatcher::new(config.navigation.clone())?;
        let page = navigation.classify(&url);
        if page == PageKind::Foreign {
            return Err(QmError::new(
                "page.unsupported_url",
                format!("`{url}` is neither the host nor the quiet destination"),
            ));
        }

        let mirror = PreferenceMirror::new(store, &config.store);
        let scheduler = Scheduler::new(config.scheduler.clone(), SuppressionEngine::default());
        let mut this = Self {
            doc,
            ctx: SessionContext::new(url.clone(), page),
            config,
            location: url,
            mirror,
            scheduler,
            navigation,
            affordance: ToggleAffordance::default(),
            endpoint,
            redirector,
            timers: TimerQueue::new(),
            theme_observers: Vec::new(),
            attached: true,
        };
        info!(url = %this.location, page = page.as_str(), "page attached");

        this.mount_affordance();
        this.navigation.watch_logo(&this.doc);
        let flag = this.mirror.load();
        if flag.is_known() {
            this.on_flag(flag);
        } else {
            this.schedule(PageTask::StorageRetry, this.config.navigation.storage_retry_ms);
        }

        this.schedule(PageTask::UrlPoll, this.config.navigation.url_poll_ms);
        this.schedule(PageTask::LogoWatch, this.config.navigation.logo_watch_ms);
        this.schedule(PageTask::NavbarWatch, this.config.navigation.navbar_watch_ms);
        Ok(this)
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn flag(&self) -> FlagState {
        self.ctx.flag
    }

    pub fn mode(&self) -> Mode {
        self.scheduler.mode()
    }

    pub fn now(&self) -> Millis {
        self.ctx.now
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn navigation(&self) -> &NavigationWatcher {
        &self.navigation
    }

    pub fn affordance(&self) -> &ToggleAffordance {
        &self.affordance
    }

    pub fn redirector(&self) -> &R {
        &self.redirector
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Lets the host page change its own document. Observers see the
    /// mutations on the next turn of the loop.
    pub fn mutate<T>(&mut self, change: impl FnOnce(&mut Document) -> T) -> T {
        change(&mut self.doc)
    }

    /// Runs the loop up to `to`, firing every timer that falls due.
    pub fn advance(&mut self, to: Millis) {
        if !self.attached {
            self.ctx.now = self.ctx.now.max(to);
            return;
        }

        self.settle();
        loop {
            let next = [self.timers.next_deadline(), self.scheduler.next_deadline()]
                .into_iter()
                .flatten()
                .min();
            let Some(deadline) = next.filter(|deadline| *deadline <= to) else {
                break;
            };
            self.ctx.now = self.ctx.now.max(deadline);
            self.fire_page_timers();
            self.scheduler.fire_due(&mut self.doc, self.ctx.now);
            self.settle();
        }
        self.ctx.now = self.ctx.now.max(to);
    }

    pub fn push_state(&mut self, url: Url) -> NavigationOutcome {
        self.history(HistoryEvent::PushState, url)
    }

    pub fn replace_state(&mut self, url: Url) -> NavigationOutcome {
        self.history(HistoryEvent::ReplaceState, url)
    }

    pub fn pop_state(&mut self, url: Url) -> NavigationOutcome {
        self.history(HistoryEvent::PopState, url)
    }

    /// Changes the location without any history hook firing. Only the URL
    /// poll notices.
    pub fn set_location(&mut self, url: Url) {
        self.location = url;
    }

    /// Dispatches a click. Returns true when the page consumed it.
    pub fn click(&mut self, target: NodeId) -> QmResult<bool> {
        if !self.attached {
            return Ok(false);
        }
        self.settle();

        if self
            .navigation
            .on_click(&self.doc, &self.ctx, target, &mut self.redirector)
        {
            return Ok(true);
        }
        if !self.affordance.contains(&self.doc, target) {
            return Ok(false);
        }

        match &self.endpoint {
            Some(endpoint) => endpoint.send(&ExtensionMessage::ToggleSuppression)?,
            None => {
                let flag = self.mirror.request(!self.enabled_for_display())?;
                self.on_flag(flag);
            }
        }
        Ok(true)
    }

    pub fn handle_message(&mut self, message: ExtensionMessage) {
        match message {
            ExtensionMessage::UpdateSuppression { enabled } => {
                match self.mirror.observe_pushed(enabled) {
                    Some(flag) => self.on_flag(flag),
                    None => self.render(),
                }
            }
            ExtensionMessage::UpdateIcon { enabled } => self.render_as(enabled),
            other => debug!(action = other.action(), "ignored message"),
        }
    }

    /// Stops every observer and timer. Styles already applied stay in place.
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.scheduler.detach(&mut self.doc);
        for observer in self.theme_observers.drain(..) {
            self.doc.disconnect(observer);
        }
        self.timers.clear();
        self.attached = false;
        info!(url = %self.location, "page detached");
    }

    fn history(&mut self, event: HistoryEvent, url: Url) -> NavigationOutcome {
        self.location = url.clone();
        let outcome = self
            .navigation
            .on_history(&mut self.ctx, event, &url, &mut self.redirector);
        if outcome.url_changed && self.attached {
            self.after_navigation();
        }
        outcome
    }

    fn after_navigation(&mut self) {
        self.scheduler.evaluate(&mut self.doc, &mut self.ctx);
        self.render();
    }

    fn on_flag(&mut self, flag: FlagState) {
        if !self.attached {
            return;
        }
        self.ctx.flag = flag;
        self.scheduler.evaluate(&mut self.doc, &mut self.ctx);
        self.render();
        self.navigation.check_home(&self.ctx, &mut self.redirector);
    }

    fn settle(&mut self) {
        let inbound = self
            .endpoint
            .as_ref()
            .map(LocalEndpoint::drain)
            .unwrap_or_default();
        for message in inbound {
            match message {
                Ok(message) => self.handle_message(message),
                Err(error) => {
                    warn!(code = error.code, message = %error.message, "message dropped");
                }
            }
        }

        for flag in self.mirror.pump() {
            self.on_flag(flag);
        }

        let theme_changed = self
            .theme_observers
            .clone()
            .into_iter()
            .fold(false, |changed, observer| {
                !self.doc.take_records(observer).is_empty() || changed
            });
        if theme_changed {
            debug!("theme attributes changed");
            self.render();
        }

        self.scheduler.on_mutations(&mut self.doc, self.ctx.now);
    }

    fn fire_page_timers(&mut self) {
        while let Some((_, task)) = self.timers.pop_due(self.ctx.now) {
            match task {
                PageTask::UrlPoll => {
                    let location = self.location.clone();
                    let outcome =
                        self.navigation
                            .poll(&mut self.ctx, &location, &mut self.redirector);
                    if outcome.url_changed {
                        self.after_navigation();
                    }
                    self.schedule(PageTask::UrlPoll, self.config.navigation.url_poll_ms);
                }
                PageTask::LogoWatch => {
                    self.navigation.watch_logo(&self.doc);
                    self.schedule(PageTask::LogoWatch, self.config.navigation.logo_watch_ms);
                }
                PageTask::NavbarWatch => {
                    self.mount_affordance();
                    self.schedule(PageTask::NavbarWatch, self.config.navigation.navbar_watch_ms);
                }
                PageTask::StorageRetry => {
                    let flag = self.mirror.load();
                    if flag.is_known() {
                        self.on_flag(flag);
                    } else {
                        self.schedule(
                            PageTask::StorageRetry,
                            self.config.navigation.storage_retry_ms,
                        );
                    }
                }
            }
        }
    }

    fn schedule(&mut self, task: PageTask, delay_ms: u64) {
        self.timers.schedule_at(self.ctx.now.after(delay_ms.max(1)), task);
    }

    fn mount_affordance(&mut self) {
        match self.affordance.ensure_mounted(&mut self.doc, self.ctx.page) {
            Ok(true) => {
                if self.theme_observers.is_empty() {
                    for node in [self.doc.document_element(), self.doc.body()]
                        .into_iter()
                        .flatten()
                    {
                        let observer = self
                            .doc
                            .observe(node, ObserverInit::attributes_only(THEME_ATTRIBUTES));
                        self.theme_observers.push(observer);
                    }
                }
                self.render();
            }
            Ok(false) => {}
            Err(error) => {
                warn!(code = error.code, message = %error.message, "toggle affordance not mounted");
            }
        }
    }

    fn enabled_for_display(&self) -> bool {
        self.ctx
            .flag
            .as_bool()
            .unwrap_or(self.config.store.default_enabled)
    }

    fn render(&mut self) {
        self.render_as(self.enabled_for_display());
    }

    fn render_as(&mut self, enabled: bool) {
        let view = present(enabled, self.ctx.page, detect_theme(&self.doc));
        self.affordance.render(&mut self.doc, &view);
    }
}

#[cfg(test)]
mod tests {
    use super::Page;
    use super::RouterAction;
    use super::TOGGLE_BUTTON_ID;
    use super::ToggleRouter;
    use qm_core::FlagState;
    use qm_core::Millis;
    use qm_core::QuietConfig;
    use qm_dom::Document;
    use qm_dom::NodeId;
    use qm_html::HtmlParser;
    use qm_ipc::ExtensionMessage;
    use qm_ipc::LocalEndpoint;
    use qm_nav::RecordingRedirector;
    use qm_nav::RedirectReason;
    use qm_scheduler::Mode;
    use qm_storage::MemoryPreferenceStore;
    use qm_storage::PreferenceStore;
    use qm_surfaces::SUPPRESSED_ATTR;
    use serde_json::Value;
    use std::sync::Arc;
    use url::Url;

    const WATCH_HTML: &str = r#"<html><body>
        <ytd-masthead>
            <div id="start"><ytd-topbar-logo-renderer><a id="logo" href="/"><yt-icon id="logo-icon"></yt-icon></a></ytd-topbar-logo-renderer></div>
            <div id="end"><div id="buttons">
                <ytd-button-renderer><button aria-label="Create"></button></ytd-button-renderer>
                <ytd-notification-topbar-button-renderer><button aria-label="Notifications"></button></ytd-notification-topbar-button-renderer>
                <ytd-topbar-menu-button-renderer id="avatar"></ytd-topbar-menu-button-renderer>
            </div></div>
        </ytd-masthead>
        <ytd-watch-flexy><div id="columns">
            <div id="primary">
                <div id="movie_player"><video></video></div>
                <ytd-comments id="comments"><p>first!</p></ytd-comments>
            </div>
            <div id="secondary"><ytd-watch-next-secondary-results-renderer></ytd-watch-next-secondary-results-renderer></div>
        </div></ytd-watch-flexy>
    </body></html>"#;

    const SEARCH_HTML: &str = r#"<html><body>
        <ytd-masthead><div id="end"><div id="buttons">
            <ytd-notification-topbar-button-renderer></ytd-notification-topbar-button-renderer>
        </div></div></ytd-masthead>
        <ytd-search><p>results</p></ytd-search>
    </body></html>"#;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap_or_else(|_| unreachable!())
    }

    fn watch_url() -> Url {
        url("https://www.youtube.com/watch?v=abc")
    }

    fn attach(
        html: &str,
        at: Url,
        store: &Arc<MemoryPreferenceStore>,
        endpoint: Option<LocalEndpoint>,
    ) -> Page {
        let shared: Arc<dyn PreferenceStore> = store.clone();
        let page = Page::attach(
            HtmlParser.parse(html),
            at,
            QuietConfig::default(),
            shared,
            endpoint,
            RecordingRedirector::default(),
        );
        assert!(page.is_ok());
        page.unwrap_or_else(|_| unreachable!())
    }

    fn node(doc: &Document, selector: &str) -> NodeId {
        doc.select(selector)
            .ok()
            .flatten()
            .unwrap_or_else(|| unreachable!())
    }

    fn is_suppressed(page: &Page, selector: &str) -> bool {
        page.doc()
            .has_attribute(node(page.doc(), selector), SUPPRESSED_ATTR)
    }

    fn tagged(page: &Page) -> usize {
        let doc = page.doc();
        doc.descendants(doc.root())
            .into_iter()
            .filter(|id| doc.has_attribute(*id, SUPPRESSED_ATTR))
            .count()
    }

    #[test]
    fn enabled_watch_page_is_suppressed_on_attach() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut page = attach(WATCH_HTML, watch_url(), &store, None);
        page.advance(Millis(600));

        assert_eq!(page.flag(), FlagState::Enabled);
        assert_eq!(page.mode(), Mode::Apply);
        assert!(is_suppressed(&page, "#comments"));
        assert!(is_suppressed(&page, "#secondary"));
        assert!(is_suppressed(&page, "ytd-notification-topbar-button-renderer"));
        assert!(!page.doc().is_rendered(node(page.doc(), "#comments")));

        let button = node(page.doc(), &format!("#{TOGGLE_BUTTON_ID}"));
        assert_eq!(page.doc().get_attribute(button, "aria-pressed"), Some("true"));
        assert!(page.doc().is_rendered(button));
    }

    #[test]
    fn unavailable_storage_keeps_the_page_untouched() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store.set_unavailable(true);
        let mut page = attach(WATCH_HTML, watch_url(), &store, None);
        page.advance(Millis(2500));

        assert_eq!(page.flag(), FlagState::Unknown);
        assert_eq!(page.mode(), Mode::Neutral);
        assert_eq!(tagged(&page), 0);

        store.set_unavailable(false);
        page.advance(Millis(3500));
        assert_eq!(page.flag(), FlagState::Enabled);
        assert!(is_suppressed(&page, "#comments"));
    }

    #[test]
    fn push_state_home_redirects_exactly_once_when_enabled() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut page = attach(WATCH_HTML, watch_url(), &store, None);
        page.advance(Millis(100));

        page.push_state(url("https://www.youtube.com/"));
        page.advance(Millis(5000));
        assert_eq!(page.redirector().redirects.len(), 1);
        assert_eq!(page.redirector().redirects[0].1, RedirectReason::HomeArrival);
    }

    #[test]
    fn push_state_home_does_not_redirect_when_disabled() {
        let store = Arc::new(MemoryPreferenceStore::new());
        assert!(store.set("noDistractionsEnabled", Value::Bool(false)).is_ok());
        let mut page = attach(WATCH_HTML, watch_url(), &store, None);
        page.advance(Millis(100));

        page.push_state(url("https://www.youtube.com/"));
        page.advance(Millis(5000));
        assert!(page.redirector().redirects.is_empty());
    }

    #[test]
    fn url_poll_catches_silent_navigation() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut page = attach(WATCH_HTML, watch_url(), &store, None);
        page.advance(Millis(100));

        page.set_location(url("https://www.youtube.com/feed/"));
        page.advance(Millis(400));
        assert!(page.redirector().redirects.is_empty());
        page.advance(Millis(600));
        assert_eq!(page.redirector().redirects.len(), 1);
    }

    #[test]
    fn logo_click_redirects_when_enabled() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut page = attach(WATCH_HTML, watch_url(), &store, None);
        page.advance(Millis(100));

        let icon = node(page.doc(), "#logo-icon");
        assert_eq!(page.click(icon), Ok(true));
        assert_eq!(page.redirector().redirects.len(), 1);
        assert_eq!(page.redirector().redirects[0].1, RedirectReason::LogoClick);

        let avatar = node(page.doc(), "#avatar");
        assert_eq!(page.click(avatar), Ok(false));
    }

    #[test]
    fn toggle_through_router_restores_in_place() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let shared: Arc<dyn PreferenceStore> = store.clone();
        let router = ToggleRouter::new(
            shared,
            QuietConfig::default().store,
            QuietConfig::default().navigation,
        );
        assert!(router.is_ok());
        let mut router = router.unwrap_or_else(|_| unreachable!());
        assert!(router.on_installed().is_ok());
        let (id, endpoint) = router.connect(watch_url());

        let mut page = attach(WATCH_HTML, watch_url(), &store, Some(endpoint));
        page.advance(Millis(1000));
        assert!(is_suppressed(&page, "#comments"));

        let button = node(page.doc(), &format!("#{TOGGLE_BUTTON_ID}"));
        assert_eq!(page.click(button), Ok(true));
        let actions = router.pump();
        assert_eq!(
            actions,
            vec![RouterAction::Message {
                to: id,
                message: ExtensionMessage::UpdateSuppression { enabled: false },
            }]
        );

        page.advance(Millis(1100));
        assert_eq!(page.flag(), FlagState::Disabled);
        assert_eq!(page.mode(), Mode::Restore);
        page.advance(Millis(6000));
        assert_eq!(tagged(&page), 0);
        assert!(page.doc().is_rendered(node(page.doc(), "#comments")));
        assert_eq!(page.doc().get_attribute(button, "aria-pressed"), Some("false"));
    }

    #[test]
    fn other_instances_follow_store_changes() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut first = attach(WATCH_HTML, watch_url(), &store, None);
        let mut second = attach(WATCH_HTML, watch_url(), &store, None);
        first.advance(Millis(600));
        second.advance(Millis(600));
        assert!(is_suppressed(&second, "#comments"));

        let button = node(first.doc(), &format!("#{TOGGLE_BUTTON_ID}"));
        assert_eq!(first.click(button), Ok(true));
        assert_eq!(first.flag(), FlagState::Disabled);

        second.advance(Millis(5000));
        assert_eq!(second.flag(), FlagState::Disabled);
        assert_eq!(tagged(&second), 0);
    }

    #[test]
    fn host_churn_is_suppressed_after_debounce() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut page = attach(WATCH_HTML, watch_url(), &store, None);
        page.advance(Millis(6000));

        let fresh = page.mutate(|doc| {
            let old = node(doc, "#comments");
            let fresh = doc.create_element("ytd-comments");
            doc.set_attribute(fresh, "id", "comments");
            assert!(doc.replace(old, fresh).is_ok());
            fresh
        });
        page.advance(Millis(6100));
        assert!(!page.doc().has_attribute(fresh, SUPPRESSED_ATTR));

        page.advance(Millis(6600));
        assert!(page.doc().has_attribute(fresh, SUPPRESSED_ATTR));
    }

    #[test]
    fn theme_change_swaps_icon_family() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut page = attach(SEARCH_HTML, url("https://www.youtube.com/results?search_query=x"), &store, None);
        page.advance(Millis(10));
        let icon = node(page.doc(), "#quiet-mode-toggle-icon");
        assert_eq!(page.doc().get_attribute(icon, "src"), Some("icons/quiet_mode_on_black.png"));

        page.mutate(|doc| {
            let html = doc.document_element().unwrap_or_else(|| unreachable!());
            doc.set_attribute(html, "dark", "");
        });
        page.advance(Millis(20));
        assert_eq!(page.doc().get_attribute(icon, "src"), Some("icons/quiet_mode_off.png"));
    }

    #[test]
    fn navbar_watch_remounts_the_toggle() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut page = attach(SEARCH_HTML, url("https://www.youtube.com/results?search_query=x"), &store, None);
        page.advance(Millis(10));

        page.mutate(|doc| {
            let button = node(doc, "#quiet-mode-toggle-button");
            assert!(doc.remove(button));
        });
        page.advance(Millis(1500));
        assert!(page.affordance().is_mounted(page.doc()));
        assert_eq!(page.affordance().mounts(), 2);
    }

    #[test]
    fn detach_stops_all_observation() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut page = attach(WATCH_HTML, watch_url(), &store, None);
        page.advance(Millis(600));
        page.detach();

        assert_eq!(page.mode(), Mode::Neutral);
        assert_eq!(page.doc().observer_count(), 0);
        assert!(is_suppressed(&page, "#comments"));
    }

    #[test]
    fn foreign_pages_are_refused() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let shared: Arc<dyn PreferenceStore> = store.clone();
        let page: Result<Page, _> = Page::attach(
            Document::new(),
            url("https://example.com/"),
            QuietConfig::default(),
            shared,
            None,
            RecordingRedirector::default(),
        );
        assert!(page.is_err());
    }
}
