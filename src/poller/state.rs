//! Watermark + processed-id state with an injected persistence boundary.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Most-recent processed ids retained on save.
pub const PROCESSED_ID_CAP: usize = 5000;

/// Poller progress: last-seen internal timestamp plus a bounded recency set
/// of processed message ids.
///
/// The watermark is the primary ordering mechanism; `processed_ids` only
/// guards against duplicate delivery within the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkState {
    /// Millisecond internal timestamp of the newest processed message.
    pub last_internal_ts: i64,
    /// Processed message ids, oldest first, capped at [`PROCESSED_ID_CAP`].
    #[serde(default)]
    pub processed_ids: Vec<String>,
    #[serde(skip)]
    id_index: HashSet<String>,
}

impl WatermarkState {
    /// Fresh state anchored at `now_ms` — historical messages are never
    /// processed on first run.
    pub fn starting_at(now_ms: i64) -> Self {
        Self {
            last_internal_ts: now_ms,
            processed_ids: Vec::new(),
            id_index: HashSet::new(),
        }
    }

    /// Rebuild the lookup index after deserialization.
    pub fn reindex(&mut self) {
        self.id_index = self.processed_ids.iter().cloned().collect();
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.id_index.contains(id)
    }

    /// Record a processed message: remember its id and advance the watermark
    /// monotonically to its internal timestamp.
    pub fn mark_processed(&mut self, id: &str, internal_ts: i64) {
        if self.id_index.insert(id.to_string()) {
            self.processed_ids.push(id.to_string());
        }
        if internal_ts > self.last_internal_ts {
            self.last_internal_ts = internal_ts;
        }
    }

    /// Drop all but the most recent [`PROCESSED_ID_CAP`] ids.
    pub fn truncate_ids(&mut self) {
        if self.processed_ids.len() > PROCESSED_ID_CAP {
            let drop = self.processed_ids.len() - PROCESSED_ID_CAP;
            for id in self.processed_ids.drain(..drop) {
                self.id_index.remove(&id);
            }
        }
    }
}

/// Persistence boundary for [`WatermarkState`] — injected so the poller is
/// testable without touching disk.
pub trait StateStore: Send + Sync {
    /// Load persisted state; `None` on first run.
    fn load(&self) -> Result<Option<WatermarkState>, StoreError>;

    /// Persist state. Implementations must be atomic — a crash mid-save may
    /// not corrupt the previous state.
    fn save(&self, state: &WatermarkState) -> Result<(), StoreError>;
}

/// File-backed state store: JSON, written via temp file + rename.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<WatermarkState>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| StoreError::Read {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut state: WatermarkState = serde_json::from_str(&raw)?;
        state.reindex();
        Ok(Some(state))
    }

    fn save(&self, state: &WatermarkState) -> Result<(), StoreError> {
        let mut bounded = state.clone();
        bounded.truncate_ids();

        let raw = serde_json::to_string_pretty(&bounded)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(|e| StoreError::Write {
            path: tmp.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::Write {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
