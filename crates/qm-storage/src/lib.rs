//! Persisted preference stores and the page-side Preference Mirror.

mod file;
mod mirror;

pub use file::FilePreferenceStore;
pub use mirror::PreferenceMirror;

use qm_core::QmError;
use qm_core::QmResult;
use qm_core::config::StoreConfig;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use tracing::info;

/// One key changing value, delivered to every subscriber of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Key/value store shared by every instance. Changes made through any handle
/// are announced to every subscriber, including the one that made them.
pub trait PreferenceStore: Debug + Send + Sync {
    fn get(&self, key: &str) -> QmResult<Option<Value>>;

    /// Persists `value`. Subscribers are notified only when the value changed.
    fn set(&self, key: &str, value: Value) -> QmResult<()>;

    fn subscribe(&self) -> mpsc::Receiver<StorageChange>;
}

/// Writes the default flag when the key was never set. Returns true when the
/// default was written.
pub fn install_defaults(store: &dyn PreferenceStore, config: &StoreConfig) -> QmResult<bool> {
    if store.get(&config.key)?.is_some() {
        return Ok(false);
    }

    store.set(&config.key, Value::Bool(config.default_enabled))?;
    info!(key = %config.key, enabled = config.default_enabled, "installed default preference");
    Ok(true)
}

/// Fan-out list of change listeners. Dropped receivers are pruned on send.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<mpsc::Sender<StorageChange>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> mpsc::Receiver<StorageChange> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    pub(crate) fn notify(&self, change: &StorageChange) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|sender| sender.send(change.clone()).is_ok());
        }
    }
}

pub(crate) fn lock_failed(store: &str) -> QmError {
    QmError::new(
        "storage.lock_poisoned",
        format!("{store} preference store lock was poisoned"),
    )
}

/// In-process store. Can be switched into an unavailable state to exercise
/// the storage-failure path.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, Value>>,
    subscribers: Subscribers,
    unavailable: AtomicBool,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> QmResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QmError::new(
                "storage.unavailable",
                "preference store is not reachable",
            ));
        }
        Ok(())
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> QmResult<Option<Value>> {
        self.check_available()?;
        let values = self.values.lock().map_err(|_| lock_failed("memory"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> QmResult<()> {
        self.check_available()?;
        let old_value = {
            let mut values = self.values.lock().map_err(|_| lock_failed("memory"))?;
            if values.get(key) == Some(&value) {
                return Ok(());
            }
            values.insert(key.to_owned(), value.clone())
        };

        self.subscribers.notify(&StorageChange {
            key: key.to_owned(),
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<StorageChange> {
        self.subscribers.subscribe()
    }
}
