//! Preference store persisted as one JSON object per file.

use qm_core::QmError;
use qm_core::QmResult;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::mpsc;

use crate::PreferenceStore;
use crate::StorageChange;
use crate::Subscribers;
use crate::lock_failed;

#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
    subscribers: Subscribers,
}

impl FilePreferenceStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
            subscribers: Subscribers::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> QmResult<Option<Value>> {
        let mut map = read_map(&self.path)?;
        Ok(map.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> QmResult<()> {
        let old_value = {
            let _guard = self.write_lock.lock().map_err(|_| lock_failed("file"))?;
            let mut map = read_map(&self.path)?;
            if map.get(key) == Some(&value) {
                return Ok(());
            }
            let previous = map.insert(key.to_owned(), value.clone());
            write_map(&self.path, &map)?;
            previous
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

fn read_map(path: &Path) -> QmResult<BTreeMap<String, Value>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path).map_err(|error| {
        QmError::new(
            "storage.read_failed",
            format!("failed to read preference file `{}`: {error}", path.display()),
        )
    })?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    serde_json::from_str(&content).map_err(|error| {
        QmError::new(
            "storage.format_invalid",
            format!(
                "preference file `{}` is not a JSON object: {error}",
                path.display()
            ),
        )
    })
}

fn write_map(path: &Path, map: &BTreeMap<String, Value>) -> QmResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            QmError::new(
                "storage.dir_create_failed",
                format!(
                    "failed to create preference directory `{}`: {error}",
                    parent.display()
                ),
            )
        })?;
    }

    let encoded = serde_json::to_string_pretty(map).map_err(|error| {
        QmError::new(
            "storage.value_encode_failed",
            format!("failed to encode preferences: {error}"),
        )
    })?;

    fs::write(path, encoded).map_err(|error| {
        QmError::new(
            "storage.write_failed",
            format!("failed to write preference file `{}`: {error}", path.display()),
        )
    })
}
