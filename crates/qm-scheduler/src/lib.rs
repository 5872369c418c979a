//! Reconciliation scheduler: decides when apply and restore passes run.
//!
//! The scheduler is a two-mode state machine driven by the page's event
//! loop. Exactly one observer exists while a mode is active, and every timer
//! belongs to the active mode, so a mode switch cancels all of them at once.

use qm_core::FlagState;
use qm_core::Millis;
use qm_core::PageKind;
use qm_core::SessionContext;
use qm_core::TimerId;
use qm_core::TimerQueue;
use qm_core::config::SchedulerConfig;
use qm_dom::Document;
use qm_dom::ObserverId;
use qm_dom::ObserverInit;
use qm_surfaces::PassReport;
use qm_surfaces::SuppressionEngine;
use std::collections::VecDeque;
use tracing::debug;
use tracing::info;

const PASS_LOG_CAPACITY: usize = 128;

const PRIMARY_MEDIA_SELECTOR: &str = "#movie_player video, video";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    #[default]
    Neutral,
    Apply,
    Restore,
}

impl Mode {
    /// Mode implied by the flag and page type.
    pub fn select(flag: FlagState, page: PageKind) -> Self {
        if !page.is_target() {
            return Self::Neutral;
        }
        match flag {
            FlagState::Enabled => Self::Apply,
            FlagState::Disabled => Self::Restore,
            FlagState::Unknown => Self::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Apply => "apply",
            Self::Restore => "restore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Apply,
    Restore,
}

/// Why a pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassTrigger {
    Activation,
    Retry,
    Debounce,
    Periodic,
    MediaRecheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub at: Millis,
    pub kind: PassKind,
    pub trigger: PassTrigger,
    pub report: PassReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub apply_passes: u64,
    pub restore_passes: u64,
    pub mode_switches: u64,
    pub mutation_batches: u64,
    pub throttled: u64,
    pub deferred_for_media: u64,
    pub dropped_overlapping: u64,
}

/// The active mode's mutation subscription and its pending debounce timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle {
    pub mode: Mode,
    pub observer: ObserverId,
    pub debounce: Option<TimerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Apply(PassTrigger),
    Restore(PassTrigger),
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    engine: SuppressionEngine,
    mode: Mode,
    page: PageKind,
    handle: Option<ObserverHandle>,
    timers: TimerQueue<Task>,
    media_recheck: Option<TimerId>,
    last_restore: Option<Millis>,
    in_pass: bool,
    stats: SchedulerStats,
    log: VecDeque<PassRecord>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, engine: SuppressionEngine) -> Self {
        Self {
            config,
            engine,
            mode: Mode::Neutral,
            page: PageKind::Foreign,
            handle: None,
            timers: TimerQueue::new(),
            media_recheck: None,
            last_restore: None,
            in_pass: false,
            stats: SchedulerStats::default(),
            log: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn handle(&self) -> Option<ObserverHandle> {
        self.handle
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn engine(&self) -> &SuppressionEngine {
        &self.engine
    }

    /// Most recent passes, oldest first.
    pub fn pass_log(&self) -> impl Iterator<Item = &PassRecord> {
        self.log.iter()
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        self.timers.next_deadline()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Re-selects the mode from the context. The active mode is torn down and
    /// stood up again when the mode or page type changed, or when the URL is
    /// still in an unconsumed initial load.
    pub fn evaluate(&mut self, doc: &mut Document, ctx: &mut SessionContext) -> Mode {
        let desired = Mode::select(ctx.flag, ctx.page);
        let fresh_url = ctx.navigation.initial_load && desired != Mode::Neutral;
        if desired == self.mode && ctx.page == self.page && !fresh_url {
            return self.mode;
        }

        let previous = self.mode;
        self.teardown(doc);
        self.page = ctx.page;
        self.mode = desired;
        if previous != desired {
            self.stats.mode_switches = self.stats.mode_switches.saturating_add(1);
        }
        info!(
            from = previous.as_str(),
            to = desired.as_str(),
            page = ctx.page.as_str(),
            "reconciliation mode selected"
        );

        match desired {
            Mode::Neutral => {}
            Mode::Apply => {
                ctx.navigation.consume_initial_load();
                self.attach_observer(doc, Mode::Apply);
                for delay in &self.config.apply_retry_schedule_ms {
                    self.timers
                        .schedule_at(ctx.now.after(*delay), Task::Apply(PassTrigger::Retry));
                }
                if self.config.periodic_apply_ms > 0 {
                    self.timers.schedule_at(
                        ctx.now.after(self.config.periodic_apply_ms),
                        Task::Apply(PassTrigger::Periodic),
                    );
                }
                self.run_apply(doc, ctx.now, PassTrigger::Activation);
            }
            Mode::Restore => {
                let initial = ctx.navigation.consume_initial_load();
                self.attach_observer(doc, Mode::Restore);
                let schedule = if initial {
                    &self.config.initial_restore_schedule_ms
                } else {
                    &self.config.toggle_restore_schedule_ms
                };
                debug!(
                    initial_load = initial,
                    retries = schedule.len(),
                    "restore schedule selected"
                );
                for delay in schedule {
                    self.timers
                        .schedule_at(ctx.now.after(*delay), Task::Restore(PassTrigger::Retry));
                }
                self.fire_due(doc, ctx.now);
            }
        }

        self.mode
    }

    /// Collects the active observer's records. Any batch restarts the debounce
    /// window; the last one scheduled wins.
    pub fn on_mutations(&mut self, doc: &mut Document, now: Millis) -> usize {
        let Some(mut handle) = self.handle else {
            return 0;
        };

        let records = doc.take_records(handle.observer);
        if records.is_empty() {
            return 0;
        }
        self.stats.mutation_batches = self.stats.mutation_batches.saturating_add(1);

        if let Some(pending) = handle.debounce.take() {
            self.timers.cancel(pending);
        }
        let (delay, task) = match handle.mode {
            Mode::Apply => (
                self.config.apply_debounce_ms,
                Task::Apply(PassTrigger::Debounce),
            ),
            Mode::Restore => (
                self.config.restore_debounce_ms,
                Task::Restore(PassTrigger::Debounce),
            ),
            Mode::Neutral => return records.len(),
        };
        handle.debounce = Some(self.timers.schedule_at(now.after(delay), task));
        self.handle = Some(handle);
        records.len()
    }

    /// Runs every task due at or before `now`. Returns the passes that ran.
    pub fn fire_due(&mut self, doc: &mut Document, now: Millis) -> Vec<PassRecord> {
        let mut ran = Vec::new();
        while let Some((id, task)) = self.timers.pop_due(now) {
            if let Some(handle) = self.handle.as_mut() {
                if handle.debounce == Some(id) {
                    handle.debounce = None;
                }
            }
            if self.media_recheck == Some(id) {
                self.media_recheck = None;
            }

            let record = match task {
                Task::Apply(trigger) => {
                    if trigger == PassTrigger::Periodic && self.config.periodic_apply_ms > 0 {
                        self.timers.schedule_at(
                            now.after(self.config.periodic_apply_ms),
                            Task::Apply(PassTrigger::Periodic),
                        );
                    }
                    self.run_apply(doc, now, trigger)
                }
                Task::Restore(trigger) => self.run_restore(doc, now, trigger),
            };
            ran.extend(record);
        }
        ran
    }

    /// Tears down the active mode and forgets the page.
    pub fn detach(&mut self, doc: &mut Document) {
        self.teardown(doc);
        if self.mode != Mode::Neutral {
            info!(from = self.mode.as_str(), "scheduler detached");
        }
        self.mode = Mode::Neutral;
        self.page = PageKind::Foreign;
    }

    fn teardown(&mut self, doc: &mut Document) {
        if let Some(handle) = self.handle.take() {
            doc.disconnect(handle.observer);
        }
        let cancelled = self.timers.clear();
        if cancelled > 0 {
            debug!(cancelled, mode = self.mode.as_str(), "cancelled pending timers");
        }
        self.media_recheck = None;
        self.last_restore = None;
    }

    fn attach_observer(&mut self, doc: &mut Document, mode: Mode) {
        let observer = doc.observe(doc.root(), ObserverInit::subtree_changes());
        self.handle = Some(ObserverHandle {
            mode,
            observer,
            debounce: None,
        });
    }

    fn run_apply(&mut self, doc: &mut Document, now: Millis, trigger: PassTrigger) -> Option<PassRecord> {
        if self.mode != Mode::Apply || !self.enter_pass() {
            return None;
        }
        let report = self.engine.apply_pass(doc, self.page);
        self.in_pass = false;
        self.stats.apply_passes = self.stats.apply_passes.saturating_add(1);
        Some(self.record(now, PassKind::Apply, trigger, report))
    }

    fn run_restore(
        &mut self,
        doc: &mut Document,
        now: Millis,
        trigger: PassTrigger,
    ) -> Option<PassRecord> {
        if self.mode != Mode::Restore {
            return None;
        }

        let throttled_until = self
            .last_restore
            .map(|last| last.after(self.config.restore_min_interval_ms))
            .filter(|until| trigger == PassTrigger::Debounce && now < *until);
        if let Some(retry_at) = throttled_until {
            let id = self
                .timers
                .schedule_at(retry_at, Task::Restore(PassTrigger::Debounce));
            if let Some(handle) = self.handle.as_mut() {
                handle.debounce = Some(id);
            }
            self.stats.throttled = self.stats.throttled.saturating_add(1);
            debug!(retry_at = %retry_at, "restore pass throttled");
            return None;
        }

        if primary_media_buffering(doc) {
            if self.media_recheck.is_none() {
                self.media_recheck = Some(self.timers.schedule_at(
                    now.after(self.config.media_poll_ms),
                    Task::Restore(PassTrigger::MediaRecheck),
                ));
            }
            self.stats.deferred_for_media = self.stats.deferred_for_media.saturating_add(1);
            debug!("restore pass deferred while media is buffering");
            return None;
        }

        if !self.enter_pass() {
            return None;
        }
        let report = self.engine.restore_pass(doc);
        self.in_pass = false;
        self.last_restore = Some(now);
        self.stats.restore_passes = self.stats.restore_passes.saturating_add(1);
        Some(self.record(now, PassKind::Restore, trigger, report))
    }

    fn enter_pass(&mut self) -> bool {
        if self.in_pass {
            self.stats.dropped_overlapping = self.stats.dropped_overlapping.saturating_add(1);
            return false;
        }
        self.in_pass = true;
        true
    }

    fn record(
        &mut self,
        at: Millis,
        kind: PassKind,
        trigger: PassTrigger,
        report: PassReport,
    ) -> PassRecord {
        debug!(
            at = %at,
            kind = ?kind,
            trigger = ?trigger,
            suppressed = report.suppressed,
            restored = report.restored,
            skipped_loading = report.skipped_loading,
            "pass finished"
        );
        let record = PassRecord {
            at,
            kind,
            trigger,
            report,
        };
        if self.log.len() == PASS_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(record.clone());
        record
    }
}

fn primary_media_buffering(doc: &Document) -> bool {
    doc.select(PRIMARY_MEDIA_SELECTOR)
        .ok()
        .flatten()
        .and_then(|video| doc.media_state(video))
        .is_some_and(|state| state.is_buffering())
}
