//! Local persistent store
//!
//! Owns the on-disk copy of the application document. The document is
//! read-modify-written wholesale as one JSON file; writes go through a
//! temp-file-and-rename so observers never see a torn document. Loading
//! self-heals tasks that lack a creation timestamp and persists the repair
//! immediately; a failure to persist the repair is logged, not raised.

use crate::model::AppData;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for local store operations.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// The underlying storage rejected a write (disk full, permissions, ...).
    Persistence(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Parse(e) => write!(f, "Malformed local document: {}", e),
            StoreError::Persistence(msg) => write!(f, "Persistence failure: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Parse(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// On-disk envelope: the document plus the moment it was last written.
/// The stamp is what the sync comparison uses as "last local mutation".
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDocument {
    saved_at: DateTime<Utc>,
    data: AppData,
}

type ChangeObserver = Box<dyn Fn(&AppData)>;

/// File-backed store for the single application document.
pub struct LocalStore {
    path: PathBuf,
    observers: Vec<ChangeObserver>,
}

impl LocalStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            observers: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a callback invoked after every successful `save`.
    pub fn on_change(&mut self, observer: impl Fn(&AppData) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Read the persisted document, or a structurally complete empty one
    /// when nothing has been saved yet.
    pub fn load(&self) -> Result<AppData> {
        let Some(stored) = self.read_envelope()? else {
            return Ok(AppData::empty());
        };
        let mut data = stored.data;

        let repaired = data.repair(Utc::now());
        if repaired > 0 {
            // Self-healing write; keep the original stamp so a repair does
            // not register as a user mutation.
            if let Err(e) = self.write_envelope(&data, stored.saved_at) {
                warn!("could not persist timestamp repair for {} task(s): {}", repaired, e);
            }
        }

        Ok(data)
    }

    /// Serialize and persist the full document atomically, then notify
    /// change observers.
    pub fn save(&self, data: &AppData) -> Result<()> {
        self.write_envelope(data, Utc::now())?;
        for observer in &self.observers {
            observer(data);
        }
        Ok(())
    }

    /// Persist `data` with a fresh `lastSynced` marker, giving the marker
    /// and the envelope stamp the same instant. A document saved this way
    /// does not read as locally modified on the next comparison.
    pub fn save_synced(&self, mut data: AppData) -> Result<AppData> {
        let now = Utc::now();
        data.last_synced = Some(now);
        self.write_envelope(&data, now)?;
        for observer in &self.observers {
            observer(&data);
        }
        Ok(data)
    }

    /// Reset to the empty document.
    pub fn clear(&self) -> Result<()> {
        self.save(&AppData::empty())
    }

    /// When the document was last written locally. `None` before the first
    /// save.
    pub fn last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read_envelope()?.map(|stored| stored.saved_at))
    }

    fn read_envelope(&self) -> Result<Option<StoredDocument>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredDocument = serde_json::from_str(&contents)?;
        Ok(Some(stored))
    }

    fn write_envelope(&self, data: &AppData, saved_at: DateTime<Utc>) -> Result<()> {
        let stored = StoredDocument {
            saved_at,
            data: data.clone(),
        };
        let serialized = serde_json::to_string_pretty(&stored)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Persistence(e.to_string()))?;
            }
        }

        // Write the new document beside the old one, then swap.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized).map_err(|e| StoreError::Persistence(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::Persistence(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;
    use std::cell::Cell;
    use std::rc::Rc;

    fn temp_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("almanac.json"));
        (dir, store)
    }

    #[test]
    fn load_without_file_returns_empty() {
        let (_dir, store) = temp_store();
        let data = store.load().unwrap();
        assert!(data.is_empty());
        assert!(store.last_modified().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = temp_store();
        let mut data = AppData::empty();
        data.tasks.push(Task::new("unicode titles wörk 🗂"));

        store.save(&data).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, data);
        assert!(store.last_modified().unwrap().is_some());
    }

    #[test]
    fn load_repairs_missing_created_at_and_persists() {
        let (_dir, store) = temp_store();
        let mut data = AppData::empty();
        let mut task = Task::new("old");
        task.created_at = None;
        task.updated_at = None;
        data.tasks.push(task);
        store.save(&data).unwrap();

        let first = store.load().unwrap();
        assert!(first.tasks[0].created_at.is_some());

        // The repair was written back, so a raw re-read sees it too.
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("createdAt"));
    }

    #[test]
    fn repair_preserves_mutation_stamp() {
        let (_dir, store) = temp_store();
        let mut data = AppData::empty();
        let mut task = Task::new("old");
        task.created_at = None;
        data.tasks.push(task);
        store.save(&data).unwrap();

        let before = store.last_modified().unwrap();
        let _ = store.load().unwrap();
        let after = store.last_modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn save_notifies_observers() {
        let (_dir, mut store) = temp_store();
        let seen = Rc::new(Cell::new(0));
        let seen_in_observer = Rc::clone(&seen);
        store.on_change(move |_| seen_in_observer.set(seen_in_observer.get() + 1));

        store.save(&AppData::empty()).unwrap();
        store.clear().unwrap();
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn save_synced_aligns_marker_with_envelope_stamp() {
        let (_dir, store) = temp_store();
        let mut data = AppData::empty();
        data.tasks.push(Task::new("x"));

        let saved = store.save_synced(data).unwrap();
        assert_eq!(store.last_modified().unwrap(), saved.last_synced);
    }

    #[test]
    fn clear_resets_to_empty() {
        let (_dir, store) = temp_store();
        let mut data = AppData::empty();
        data.tasks.push(Task::new("x"));
        store.save(&data).unwrap();

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
