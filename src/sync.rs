//! Sync between the query index and the record log.
//!
//! Export writes local changes out as snapshot lines; import folds the log
//! back into the index. Both sides agree on one rule for which snapshot of a
//! task survives ([`Task::supersedes`]), so importing the same log in any
//! line order converges on the same index state.

use crate::compact::latest_snapshots;
use crate::index::{self, Index, META_NEEDS_REWRITE, META_RECORD_FINGERPRINT};
use crate::record::RecordStore;
use crate::types::Task;
use eyre::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;

/// Options for [`export`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Rewrite the log with one line per task instead of appending.
    pub gc: bool,
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gc(mut self, gc: bool) -> Self {
        self.gc = gc;
        self
    }
}

/// What an export did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    /// Snapshot lines written.
    pub written: usize,
    /// Whether the log was rewritten rather than appended to.
    pub rewritten: bool,
}

/// What an import did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Non-blank lines scanned
    pub lines: usize,
    /// Tasks new to the index
    pub inserted: usize,
    /// Tasks whose index row was replaced
    pub updated: usize,
    /// Tasks whose index row already won
    pub unchanged: usize,
    /// Lines skipped as unparseable or invalid
    pub malformed: usize,
}

/// Whether the log changed since the index last synced with it.
pub(crate) fn is_stale(index: &Index, records: &RecordStore) -> Result<bool> {
    is_stale_in(index.conn(), records)
}

/// Export the index into the record log.
pub(crate) fn export(index: &mut Index, records: &RecordStore, options: ExportOptions) -> Result<ExportReport> {
    let needs_rewrite = index.get_meta(META_NEEDS_REWRITE)?.is_some();
    let rewrite = options.gc || needs_rewrite;

    let stale = is_stale(index, records)?;
    if rewrite && stale {
        // a rewrite from the index alone would drop lines it never saw
        log::info!("record log changed since last sync; importing before rewrite");
        import(index, records)?;
    }

    let report = index.write("export", |tx| {
        if rewrite {
            let tasks = index::all_tasks(tx)?;
            records.rewrite(&tasks).context("Failed to rewrite record log")?;
            index::clear_dirty(tx)?;
            index::clear_tombstones(tx)?;
            index::delete_meta(tx, META_NEEDS_REWRITE)?;
            index::set_meta(tx, META_RECORD_FINGERPRINT, &records.fingerprint()?)?;
            return Ok(ExportReport {
                written: tasks.len(),
                rewritten: true,
            });
        }

        let in_sync = !is_stale_in(tx, records)?;
        let mut tasks: Vec<Task> = Vec::new();
        for id in index::dirty_ids(tx)? {
            if let Some(task) = index::load_task(tx, &id)? {
                tasks.push(task);
            }
        }

        records.append(&tasks).context("Failed to append to record log")?;
        index::clear_dirty(tx)?;
        if in_sync {
            index::set_meta(tx, META_RECORD_FINGERPRINT, &records.fingerprint()?)?;
        }

        Ok(ExportReport {
            written: tasks.len(),
            rewritten: false,
        })
    })?;

    log::info!(
        "exported {} snapshot(s) to {}{}",
        report.written,
        records.path().display(),
        if report.rewritten { " (rewritten)" } else { "" }
    );
    Ok(report)
}

fn is_stale_in(conn: &rusqlite::Connection, records: &RecordStore) -> Result<bool> {
    let remembered = index::get_meta(conn, META_RECORD_FINGERPRINT)?;
    let current = records.fingerprint()?;
    Ok(remembered.as_deref() != Some(current.as_str()))
}

/// Import the record log into the index.
pub(crate) fn import(index: &mut Index, records: &RecordStore) -> Result<ImportReport> {
    let report = index.write("import", |tx| {
        let scan = records.scan().context("Failed to scan record log")?;
        let mut report = ImportReport {
            lines: scan.lines(),
            malformed: scan.malformed(),
            ..Default::default()
        };

        for entry in &scan.entries {
            if let Err(e) = &entry.task {
                log::warn!("skipping malformed record at line {}: {:#}", entry.line, e);
            }
        }

        let snapshots = latest_snapshots(scan.tasks().map(|(_, t)| t));
        let logged: HashSet<&str> = snapshots.iter().map(|t| t.id.as_str()).collect();

        for snapshot in &snapshots {
            if index::is_tombstoned(tx, &snapshot.id)? {
                log::debug!("skipping deleted task {}", snapshot.id);
                continue;
            }

            match index::load_task(tx, &snapshot.id)? {
                None => {
                    index::upsert_task(tx, snapshot)?;
                    report.inserted += 1;
                }
                Some(current) if snapshot.supersedes(&current) => {
                    index::upsert_task(tx, snapshot)?;
                    index::unmark_dirty(tx, &snapshot.id)?;
                    report.updated += 1;
                }
                Some(current) => {
                    // the log is behind this row, e.g. after a checkout of an older tasks.jsonl
                    if current.supersedes(snapshot) {
                        index::mark_dirty(tx, &current.id)?;
                    }
                    report.unchanged += 1;
                }
            }
        }

        for task in index::all_tasks(tx)? {
            if !logged.contains(task.id.as_str()) {
                log::debug!("{} is missing from the record log, queued for export", task.id);
                index::mark_dirty(tx, &task.id)?;
            }
        }

        index::set_meta(tx, META_RECORD_FINGERPRINT, &scan.fingerprint)?;
        Ok(report)
    })?;

    log::info!(
        "imported {} line(s): {} inserted, {} updated, {} unchanged, {} malformed",
        report.lines,
        report.inserted,
        report.updated,
        report.unchanged,
        report.malformed
    );
    Ok(report)
}
