//! Keyed tabular store with idempotent merge.
//!
//! The sheet is a list of string rows plus an ordered column list. Merges
//! are keyed on a primary-key column, restricted to an allowed-column set,
//! and write cell by cell so replaying the same update is a no-op.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;

/// Primary-key column mirroring the remitter reference.
pub const REMITTER_PK: &str = "RemitterPK";
/// Primary-key column mirroring the inward reference.
pub const INWARD_PK: &str = "InwardPK";

/// One tabular sheet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sheet {
    /// Column order, grown append-only as merges introduce new columns.
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl Sheet {
    fn ensure_column(&mut self, name: &str) {
        if !self.columns.iter().any(|c| c == name) {
            self.columns.push(name.to_string());
        }
    }

    fn find_row(&mut self, pk_col: &str, pk: &str) -> Option<&mut BTreeMap<String, String>> {
        self.rows
            .iter_mut()
            .find(|row| row.get(pk_col).is_some_and(|v| v == pk))
    }
}

/// Merge `updates` into `sheet`, keyed on `pk_col`.
///
/// Updates outside `allowed` are dropped. An empty or missing key appends an
/// unkeyed row. Returns the number of cells actually written.
pub fn merge(
    sheet: &mut Sheet,
    pk_col: &str,
    updates: &BTreeMap<String, String>,
    allowed: &[&str],
) -> usize {
    let filtered: BTreeMap<&str, &str> = updates
        .iter()
        .filter(|(k, _)| allowed.iter().any(|a| a == k))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if filtered.is_empty() {
        return 0;
    }

    for col in filtered.keys() {
        sheet.ensure_column(col);
    }

    let pk = filtered.get(pk_col).copied().unwrap_or("");
    if pk.is_empty() {
        let row: BTreeMap<String, String> = filtered
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let written = row.len();
        sheet.rows.push(row);
        debug!(cells = written, "Appended unkeyed row");
        return written;
    }

    if let Some(row) = sheet.find_row(pk_col, pk) {
        let mut written = 0;
        for (col, value) in &filtered {
            if row.get(*col).map(String::as_str) != Some(*value) {
                row.insert(col.to_string(), value.to_string());
                written += 1;
            }
        }
        debug!(%pk, cells = written, "Merged into existing row");
        written
    } else {
        let row: BTreeMap<String, String> = filtered
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let written = row.len();
        sheet.rows.push(row);
        debug!(%pk, cells = written, "Appended keyed row");
        written
    }
}

/// Pick the merge key for a record: the remitter reference when present,
/// otherwise the inward reference.
pub fn select_primary_key(remitter_ref: Option<&str>, inward_ref: Option<&str>) -> &'static str {
    match remitter_ref {
        Some(r) if !r.trim().is_empty() => REMITTER_PK,
        _ => match inward_ref {
            Some(i) if !i.trim().is_empty() => INWARD_PK,
            _ => INWARD_PK,
        },
    }
}

/// Add `filename` to a comma-separated file list, sorted and deduplicated.
pub fn merged_file_list(previous: Option<&str>, filename: &str) -> String {
    let mut names: Vec<&str> = previous
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if !names.contains(&filename) {
        names.push(filename);
    }
    names.sort_unstable();
    names.join(",")
}

/// Persistence seam for the sheet.
pub trait SheetStore: Send + Sync {
    fn load(&self) -> Result<Sheet, StoreError>;
    fn save(&self, sheet: &Sheet) -> Result<(), StoreError>;
}

/// JSON-file sheet store with atomic replace.
pub struct JsonSheetStore {
    path: PathBuf,
}

impl JsonSheetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SheetStore for JsonSheetStore {
    fn load(&self) -> Result<Sheet, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(StoreError::Serialization),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Sheet::default()),
            Err(e) => Err(StoreError::Read {
                path: self.path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn save(&self, sheet: &Sheet) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(sheet)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(|e| StoreError::Write {
            path: tmp.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::Write {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        info!(path = %self.path.display(), rows = sheet.rows.len(), "Sheet saved");
        Ok(())
    }
}
