//! Compaction of the record log.
//!
//! Rewrites `tasks.jsonl` so it holds exactly one snapshot per id, the one
//! that wins the last-write-wins rule. Malformed lines are dropped.

use crate::record::RecordStore;
use crate::types::Task;
use eyre::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;

/// Result of a compaction operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactResult {
    /// Non-blank lines before compaction.
    pub lines_before: usize,
    /// Lines written, one per task.
    pub lines_after: usize,
    /// Malformed lines that were dropped.
    pub malformed_dropped: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl CompactResult {
    /// Bytes reclaimed (zero if the file grew).
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Keep only the winning snapshot of each id, ordered by `(created_at, id)`.
pub fn latest_snapshots<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<Task> {
    let mut latest: HashMap<&str, &Task> = HashMap::new();
    for task in tasks {
        match latest.get(task.id.as_str()) {
            Some(current) if !task.supersedes(current) => {}
            _ => {
                latest.insert(task.id.as_str(), task);
            }
        }
    }

    let mut winners: Vec<Task> = latest.into_values().cloned().collect();
    winners.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    winners
}

/// Compact the record log in place.
pub fn compact(records: &RecordStore) -> Result<CompactResult> {
    let scan = records.scan().context("Failed to scan record log for compaction")?;

    for entry in &scan.entries {
        if let Err(e) = &entry.task {
            log::warn!("dropping malformed record at line {}: {}", entry.line, e);
        }
    }

    let winners = latest_snapshots(scan.tasks().map(|(_, t)| t));
    let bytes_after = records.rewrite(&winners).context("Failed to rewrite record log")?;

    let result = CompactResult {
        lines_before: scan.lines(),
        lines_after: winners.len(),
        malformed_dropped: scan.malformed(),
        bytes_before: scan.bytes,
        bytes_after,
    };
    log::info!(
        "compacted {}: {} -> {} lines, {} bytes saved",
        records.path().display(),
        result.lines_before,
        result.lines_after,
        result.bytes_saved()
    );
    Ok(result)
}
