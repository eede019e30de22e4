//! History persistence: JSON snapshots of collected cases.
//!
//! The snapshot is a map keyed by procedure id (case number when the id is
//! missing), written after enrichment so document lists are included. Loading
//! tolerates a missing or malformed file — history is a convenience, never a
//! gate.

use crate::error::Result;
use crate::types::Case;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One persisted case with the time it was captured
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When this snapshot entry was written
    pub collected_at: DateTime<Utc>,
    /// The case as collected (documents included when enriched)
    pub case: Case,
}

/// Write a snapshot of the given cases, replacing any previous file
pub fn save_history(path: &Path, cases: &[Case]) -> Result<()> {
    let now = Utc::now();
    let mut entries: BTreeMap<String, HistoryEntry> = BTreeMap::new();
    for case in cases {
        let key = if case.procedure_id.is_empty() {
            case.case_number.clone()
        } else {
            case.procedure_id.clone()
        };
        if key.is_empty() {
            continue;
        }
        entries.insert(
            key,
            HistoryEntry {
                collected_at: now,
                case: case.clone(),
            },
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&entries)?;
    std::fs::write(path, json)?;
    tracing::info!(path = %path.display(), cases = entries.len(), "history saved");
    Ok(())
}

/// Load a previously saved snapshot. Missing file or unreadable content
/// yields an empty map with a warning log, never an error.
pub fn load_history(path: &Path) -> BTreeMap<String, HistoryEntry> {
    if !path.exists() {
        return BTreeMap::new();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "history unreadable");
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "history malformed, ignoring");
            BTreeMap::new()
        }
    }
}
