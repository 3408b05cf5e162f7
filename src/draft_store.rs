//! Local Draft Store
//!
//! Keeps a recovery snapshot of an in-progress consultation behind an
//! injected key-value interface. `MemoryStore` serves tests and embedders,
//! `FileStore` keeps one JSON file per key on disk.
//!
//! Storage location for the file store: ~/.consultflow/drafts/<key>.json

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::session::LocalDraft;
use crate::steps::{Step, StepData};

const DRAFT_KEY_PREFIX: &str = "consultation_draft_";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Draft serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// String key-value storage for drafts
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys()
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A panic while holding the lock cannot leave a half-written entry
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }
}

/// One JSON file per key under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the default drafts directory
    pub fn default_dir() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine home directory",
            )
        })?;
        Ok(home.join(".consultflow").join("drafts"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        // Write-then-rename keeps the previous snapshot intact on failure
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "Wrote store entry");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

enum DraftEntry {
    Missing,
    Valid(LocalDraft),
    Unreadable,
}

/// Draft persistence scoped by consultation session id
#[derive(Debug)]
pub struct DraftStore<S> {
    store: S,
}

impl<S: KeyValueStore> DraftStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn key(session_id: &str) -> String {
        format!("{}{}", DRAFT_KEY_PREFIX, session_id)
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Snapshot all step data and the active step, stamped now
    pub fn save(
        &self,
        session_id: &str,
        step: Step,
        data: &StepData,
    ) -> Result<LocalDraft, StoreError> {
        self.save_at(session_id, step, data, Utc::now())
    }

    pub fn save_at(
        &self,
        session_id: &str,
        step: Step,
        data: &StepData,
        saved_at: DateTime<Utc>,
    ) -> Result<LocalDraft, StoreError> {
        let draft = LocalDraft {
            session_id: session_id.to_string(),
            step_index: step.index(),
            data: data.clone(),
            saved_at,
        };
        let json = serde_json::to_string(&draft)?;
        self.store.set(&Self::key(session_id), &json)?;
        debug!(session_id = %session_id, step = step.index(), "Local draft saved");
        Ok(draft)
    }

    /// Load the draft for a session. Entries that no longer parse are
    /// treated as absent.
    pub fn load(&self, session_id: &str) -> Result<Option<LocalDraft>, StoreError> {
        match self.read(session_id)? {
            DraftEntry::Valid(draft) => Ok(Some(draft)),
            DraftEntry::Missing | DraftEntry::Unreadable => Ok(None),
        }
    }

    /// Like `load`, but deletes an entry that cannot be restored
    pub fn load_or_discard(&self, session_id: &str) -> Result<Option<LocalDraft>, StoreError> {
        match self.read(session_id)? {
            DraftEntry::Valid(draft) => Ok(Some(draft)),
            DraftEntry::Missing => Ok(None),
            DraftEntry::Unreadable => {
                self.clear(session_id)?;
                Ok(None)
            }
        }
    }

    fn read(&self, session_id: &str) -> Result<DraftEntry, StoreError> {
        let Some(json) = self.store.get(&Self::key(session_id))? else {
            return Ok(DraftEntry::Missing);
        };
        match serde_json::from_str::<LocalDraft>(&json) {
            Ok(draft) if draft.step().is_some() => Ok(DraftEntry::Valid(draft)),
            Ok(draft) => {
                warn!(
                    session_id = %session_id,
                    step_index = draft.step_index,
                    "Ignoring local draft with out-of-range step"
                );
                Ok(DraftEntry::Unreadable)
            }
            Err(e) => {
                warn!(session_id = %session_id, "Ignoring unreadable local draft: {}", e);
                Ok(DraftEntry::Unreadable)
            }
        }
    }

    pub fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::key(session_id))?;
        info!(session_id = %session_id, "Local draft cleared");
        Ok(())
    }

    /// Every readable draft in the store
    pub fn list(&self) -> Result<Vec<LocalDraft>, StoreError> {
        let mut drafts = Vec::new();
        for key in self.store.keys()? {
            if let Some(session_id) = key.strip_prefix(DRAFT_KEY_PREFIX) {
                if let Some(draft) = self.load(session_id)? {
                    drafts.push(draft);
                }
            }
        }
        Ok(drafts)
    }
}
