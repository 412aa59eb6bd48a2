//! Run State persistence backends.
//!
//! Writes are last-writer-wins with atomic replacement: the file store
//! writes a temp file next to the target and renames it over the old state,
//! so a crash mid-write leaves the previous state intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StateError;
use crate::tracker::state::RunState;

/// Storage for the persisted Run State.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Human-readable location (path, bucket key, ...).
    fn location(&self) -> String;

    /// Load the previous state. `Ok(None)` means no state exists yet.
    async fn load(&self) -> Result<Option<RunState>, StateError>;

    /// Durably replace the stored state.
    async fn save(&self, state: &RunState) -> Result<(), StateError>;
}

// ── File store ──────────────────────────────────────────────────────

/// JSON file on local disk.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persistence_failure(&self, reason: impl ToString) -> StateError {
        StateError::PersistenceFailure {
            location: self.location(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<Option<RunState>, StateError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Unavailable {
                    location: self.location(),
                    reason: e.to_string(),
                });
            }
        };

        let state = RunState::from_json(&raw, Utc::now()).map_err(|e| StateError::Corrupt {
            location: self.location(),
            reason: e.to_string(),
        })?;
        debug!(path = %self.path.display(), seen = state.len(), "Loaded run state");
        Ok(Some(state))
    }

    async fn save(&self, state: &RunState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.persistence_failure(e))?;
        }

        let json = state.to_json()?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(|e| self.persistence_failure(e))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.persistence_failure(e))?;

        debug!(path = %self.path.display(), seen = state.len(), "Saved run state");
        Ok(())
    }
}

// ── In-memory store ─────────────────────────────────────────────────

/// Holds the serialized state in memory. For tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    raw: Mutex<Option<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw (possibly corrupt) contents.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    /// Seed the store with the current contents of a state file, leaving the
    /// file itself untouched. A missing file gives an empty store.
    pub async fn seeded_from_file(path: &Path) -> Result<Self, StateError> {
        match fs::read_to_string(path).await {
            Ok(raw) => Ok(Self::with_raw(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(StateError::Unavailable {
                location: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Seed the store with a state.
    pub fn with_state(state: &RunState) -> Result<Self, StateError> {
        Ok(Self::with_raw(state.to_json()?))
    }

    /// Current raw contents.
    pub async fn raw(&self) -> Option<String> {
        self.raw.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> Result<Option<RunState>, StateError> {
        let guard = self.raw.lock().await;
        let Some(raw) = guard.as_deref() else {
            return Ok(None);
        };
        RunState::from_json(raw, Utc::now())
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                location: self.location(),
                reason: e.to_string(),
            })
    }

    async fn save(&self, state: &RunState) -> Result<(), StateError> {
        let json = state.to_json()?;
        *self.raw.lock().await = Some(json);
        Ok(())
    }
}
