use qm_core::FlagState;
use qm_core::QmError;
use qm_core::QmResult;
use qm_core::config::StoreConfig;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::PreferenceStore;
use crate::StorageChange;

type FlagListener = Box<dyn FnMut(FlagState)>;

/// Page-local cache of the "suppression enabled" flag.
///
/// The flag only ever changes in response to something the store reported:
/// a successful read, a change notification, or a pushed update from the
/// router. `request` waits for the store's own echo instead of updating
/// optimistically.
pub struct PreferenceMirror {
    store: Arc<dyn PreferenceStore>,
    key: String,
    default_enabled: bool,
    flag: FlagState,
    changes: mpsc::Receiver<StorageChange>,
    pending: VecDeque<StorageChange>,
    listeners: Vec<FlagListener>,
    request_timeout: Duration,
}

impl fmt::Debug for PreferenceMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferenceMirror")
            .field("key", &self.key)
            .field("flag", &self.flag)
            .field("pending", &self.pending.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl PreferenceMirror {
    pub fn new(store: Arc<dyn PreferenceStore>, config: &StoreConfig) -> Self {
        let changes = store.subscribe();
        Self {
            store,
            key: config.key.clone(),
            default_enabled: config.default_enabled,
            flag: FlagState::Unknown,
            changes,
            pending: VecDeque::new(),
            listeners: Vec::new(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn read(&self) -> FlagState {
        self.flag
    }

    pub fn on_change(&mut self, listener: impl FnMut(FlagState) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Reads the persisted value. An absent value counts as the default. On a
    /// store failure the flag is left as it was and the error is logged.
    pub fn load(&mut self) -> FlagState {
        match self.store.get(&self.key) {
            Ok(value) => {
                let flag = self.flag_from_value(value.as_ref());
                self.observe(flag);
            }
            Err(error) => {
                warn!(
                    key = %self.key,
                    code = error.code,
                    message = %error.message,
                    "preference read failed"
                );
            }
        }
        self.flag
    }

    /// Drains queued store notifications. Returns each distinct flag
    /// transition in the order the store produced them.
    pub fn pump(&mut self) -> Vec<FlagState> {
        let mut queued: Vec<StorageChange> = self.pending.drain(..).collect();
        queued.extend(self.changes.try_iter());

        queued
            .iter()
            .filter_map(|change| self.observe_change(change))
            .collect()
    }

    /// Applies a value pushed by the router. Returns the new flag when it
    /// differs from the cached one.
    pub fn observe_pushed(&mut self, enabled: bool) -> Option<FlagState> {
        self.observe(FlagState::from_bool(enabled))
    }

    /// Asks the store to persist `enabled` and returns once the store has
    /// echoed the change back.
    pub fn request(&mut self, enabled: bool) -> QmResult<FlagState> {
        let wanted = FlagState::from_bool(enabled);
        if self.flag == wanted {
            return Ok(self.flag);
        }

        // An unchanged write produces no notification, so settle from a read.
        if self.store.get(&self.key)? == Some(Value::Bool(enabled)) {
            self.observe(wanted);
            return Ok(self.flag);
        }

        self.store.set(&self.key, Value::Bool(enabled))?;

        let deadline = Instant::now() + self.request_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let change = self.changes.recv_timeout(remaining).map_err(|_| {
                QmError::new(
                    "storage.request_timeout",
                    format!("no change notification for `{}`", self.key),
                )
            })?;

            if change.key == self.key && change.new_value == Some(Value::Bool(enabled)) {
                // Changes that arrived ahead of the echo are delivered first.
                for earlier in std::mem::take(&mut self.pending) {
                    self.observe_change(&earlier);
                }
                self.observe(wanted);
                debug!(key = %self.key, enabled, "preference request settled");
                return Ok(self.flag);
            }
            self.pending.push_back(change);
        }
    }

    fn flag_from_value(&self, value: Option<&Value>) -> FlagState {
        match value {
            None => FlagState::from_bool(self.default_enabled),
            Some(Value::Bool(enabled)) => FlagState::from_bool(*enabled),
            Some(other) => {
                warn!(key = %self.key, value = %other, "non-boolean preference, using default");
                FlagState::from_bool(self.default_enabled)
            }
        }
    }

    fn observe_change(&mut self, change: &StorageChange) -> Option<FlagState> {
        if change.key != self.key {
            return None;
        }
        let flag = self.flag_from_value(change.new_value.as_ref());
        self.observe(flag)
    }

    fn observe(&mut self, flag: FlagState) -> Option<FlagState> {
        if self.flag == flag {
            return None;
        }
        self.flag = flag;
        for listener in &mut self.listeners {
            listener(flag);
        }
        Some(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::PreferenceMirror;
    use crate::MemoryPreferenceStore;
    use crate::PreferenceStore;
    use qm_core::FlagState;
    use qm_core::config::StoreConfig;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn mirror_with(store: &Arc<MemoryPreferenceStore>) -> PreferenceMirror {
        let shared: Arc<dyn PreferenceStore> = store.clone();
        PreferenceMirror::new(shared, &StoreConfig::default())
    }

    #[test]
    fn absent_value_reads_as_enabled() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut mirror = mirror_with(&store);
        assert_eq!(mirror.read(), FlagState::Unknown);
        assert_eq!(mirror.load(), FlagState::Enabled);
    }

    #[test]
    fn failed_read_keeps_flag_unknown_until_retry() {
        let store = Arc::new(MemoryPreferenceStore::new());
        assert!(store.set("noDistractionsEnabled", Value::Bool(false)).is_ok());
        store.set_unavailable(true);

        let mut mirror = mirror_with(&store);
        assert_eq!(mirror.load(), FlagState::Unknown);

        store.set_unavailable(false);
        assert_eq!(mirror.load(), FlagState::Disabled);
    }

    #[test]
    fn pump_delivers_transitions_in_store_order() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut mirror = mirror_with(&store);
        mirror.load();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        mirror.on_change(move |flag| sink.borrow_mut().push(flag));

        assert!(store.set("noDistractionsEnabled", Value::Bool(false)).is_ok());
        assert!(store.set("unrelated", Value::Bool(false)).is_ok());
        assert!(store.set("noDistractionsEnabled", Value::Bool(true)).is_ok());

        assert_eq!(mirror.pump(), vec![FlagState::Disabled, FlagState::Enabled]);
        assert_eq!(*seen.borrow(), vec![FlagState::Disabled, FlagState::Enabled]);
        assert!(mirror.pump().is_empty());
    }

    #[test]
    fn request_waits_for_echo_and_consumes_it() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut mirror = mirror_with(&store);
        mirror.load();

        let result = mirror.request(false);
        assert_eq!(result, Ok(FlagState::Disabled));
        assert_eq!(store.get("noDistractionsEnabled"), Ok(Some(Value::Bool(false))));
        assert!(mirror.pump().is_empty());
    }

    #[test]
    fn request_against_unavailable_store_leaves_flag() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut mirror = mirror_with(&store);
        mirror.load();
        store.set_unavailable(true);

        assert!(mirror.request(false).is_err());
        assert_eq!(mirror.read(), FlagState::Enabled);
    }

    #[test]
    fn pushed_update_is_not_delivered_twice() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut mirror = mirror_with(&store);
        mirror.load();

        assert!(store.set("noDistractionsEnabled", Value::Bool(false)).is_ok());
        assert_eq!(mirror.observe_pushed(false), Some(FlagState::Disabled));
        assert!(mirror.pump().is_empty());
    }

    #[test]
    fn changes_ahead_of_the_echo_reach_listeners_in_order() {
        let store = Arc::new(MemoryPreferenceStore::new());
        assert!(store.set("noDistractionsEnabled", Value::Bool(true)).is_ok());
        let config = StoreConfig {
            default_enabled: false,
            ..StoreConfig::default()
        };
        let shared: Arc<dyn PreferenceStore> = store.clone();
        let mut mirror = PreferenceMirror::new(shared, &config);
        assert_eq!(mirror.load(), FlagState::Enabled);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        mirror.on_change(move |flag| sink.borrow_mut().push(flag));

        // Another instance writes a non-boolean, then `true` again, before
        // this mirror asks for `false`.
        assert!(store.set("noDistractionsEnabled", Value::Null).is_ok());
        assert!(store.set("noDistractionsEnabled", Value::Bool(true)).is_ok());

        assert_eq!(mirror.request(false), Ok(FlagState::Disabled));
        assert_eq!(
            *seen.borrow(),
            vec![FlagState::Disabled, FlagState::Enabled, FlagState::Disabled]
        );
        assert!(mirror.pump().is_empty());
    }
}
