//! Record store: the append-only JSONL log of task snapshots.
//!
//! Each line is the full state of one task at the moment it was written.
//! Later lines logically supersede earlier ones for the same id; which one
//! actually wins is decided by [`Task::supersedes`], never by file position,
//! because a union merge may interleave lines from both sides.

use crate::types::Task;
use eyre::{Context, Result, eyre};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One line of the log.
#[derive(Debug)]
pub struct Entry {
    /// 1-based line number in the file
    pub line: usize,
    pub task: Result<Task>,
}

/// Result of reading the whole log once.
#[derive(Debug)]
pub struct Scan {
    /// Non-blank lines, in file order
    pub entries: Vec<Entry>,
    /// SHA-256 of the bytes that were scanned
    pub fingerprint: String,
    pub bytes: u64,
}

impl Scan {
    /// Number of non-blank lines.
    pub fn lines(&self) -> usize {
        self.entries.len()
    }

    /// Parsed snapshots with their line numbers.
    pub fn tasks(&self) -> impl Iterator<Item = (usize, &Task)> {
        self.entries
            .iter()
            .filter_map(|e| e.task.as_ref().ok().map(|t| (e.line, t)))
    }

    pub fn malformed(&self) -> usize {
        self.entries.iter().filter(|e| e.task.is_err()).count()
    }
}

/// Handle on `tasks.jsonl`.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file empty if it does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        if !self.path.exists() {
            File::create(&self.path).with_context(|| format!("Failed to create {}", self.path.display()))?;
        }
        Ok(())
    }

    fn read_bytes(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    /// Read every line. Bad lines become `Err` entries; they never abort the scan.
    pub fn scan(&self) -> Result<Scan> {
        let bytes = self.read_bytes()?;
        let mut entries = Vec::new();

        for (idx, raw) in bytes.split(|b| *b == b'\n').enumerate() {
            let line = idx + 1;
            if raw.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            entries.push(Entry {
                line,
                task: parse_line(raw),
            });
        }

        Ok(Scan {
            entries,
            fingerprint: digest(&bytes),
            bytes: bytes.len() as u64,
        })
    }

    /// Append one line per task and fsync.
    pub fn append(&self, tasks: &[Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {} for append", self.path.display()))?;

        let mut buf = Vec::new();
        if !ends_with_newline(&mut file)? {
            // a hand edit or a merge left the last line unterminated
            buf.push(b'\n');
        }
        for task in tasks {
            serde_json::to_writer(&mut buf, task).context("Failed to serialize task")?;
            buf.push(b'\n');
        }

        file.write_all(&buf)
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", self.path.display()))?;

        log::debug!("appended {} snapshot(s) to {}", tasks.len(), self.path.display());
        Ok(())
    }

    /// Replace the whole file with one line per task.
    ///
    /// Written to a temporary file in the same directory, fsynced, then
    /// renamed over the original, so readers see either the old or the new
    /// file and never a partial one.
    pub fn rewrite(&self, tasks: &[Task]) -> Result<u64> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| eyre!("record path {} has no parent directory", self.path.display()))?;

        let mut tmp = NamedTempFile::new_in(dir).context("Failed to create temporary record file")?;
        let mut written = 0u64;
        for task in tasks {
            let mut line = serde_json::to_vec(task).context("Failed to serialize task")?;
            line.push(b'\n');
            tmp.write_all(&line).context("Failed to write temporary record file")?;
            written += line.len() as u64;
        }
        tmp.as_file().sync_all().context("Failed to sync temporary record file")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        log::debug!("rewrote {} with {} snapshot(s)", self.path.display(), tasks.len());
        Ok(written)
    }

    /// SHA-256 of the current file contents; a missing file hashes as empty.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(digest(&self.read_bytes()?))
    }
}

fn parse_line(raw: &[u8]) -> Result<Task> {
    let text = std::str::from_utf8(raw).context("line is not valid UTF-8")?;
    let mut task: Task = serde_json::from_str(text.trim()).context("line is not a task snapshot")?;
    task.normalize();
    task.check_invariants().map_err(|e| eyre!("invalid snapshot for {}: {}", task.id, e))?;
    Ok(task)
}

fn ends_with_newline(file: &mut File) -> Result<bool> {
    let len = file.metadata().context("Failed to stat record file")?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).context("Failed to seek record file")?;
    file.read_exact(&mut last).context("Failed to read record file")?;
    Ok(last[0] == b'\n')
}

fn digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::types::{Status, TaskType};
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn make_task(id: &str) -> Task {
        let now = clock::now();
        Task {
            id: id.to_string(),
            title: format!("Task {}", id),
            description: None,
            status: Status::Open,
            priority: 2,
            task_type: TaskType::Task,
            assignee: None,
            parent_id: None,
            labels: BTreeSet::new(),
            external_ref: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: None,
            metadata: BTreeMap::new(),
            dependencies: vec![],
        }
    }

    fn setup() -> (TempDir, RecordStore) {
        let temp_dir = TempDir::new().unwrap();
        let records = RecordStore::new(temp_dir.path().join("tasks.jsonl"));
        (temp_dir, records)
    }

    #[test]
    fn test_scan_missing_file_is_empty() {
        let (_temp_dir, records) = setup();
        let scan = records.scan().unwrap();
        assert_eq!(scan.lines(), 0);
        assert_eq!(scan.bytes, 0);
        assert_eq!(scan.fingerprint, records.fingerprint().unwrap());
    }

    #[test]
    fn test_append_then_scan() {
        let (_temp_dir, records) = setup();
        records.append(&[make_task("tr-0001"), make_task("tr-0002")]).unwrap();
        records.append(&[make_task("tr-0003")]).unwrap();

        let scan = records.scan().unwrap();
        let ids: Vec<_> = scan.tasks().map(|(_, t)| t.id.clone()).collect();
        assert_eq!(ids, vec!["tr-0001", "tr-0002", "tr-0003"]);
        assert_eq!(scan.malformed(), 0);
    }

    #[test]
    fn test_malformed_lines_do_not_abort_scan() {
        let (_temp_dir, records) = setup();
        let good = serde_json::to_string(&make_task("tr-good")).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"{not json\n");
        bytes.extend_from_slice(good.as_bytes());
        bytes.extend_from_slice(b"\n\n");
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"{\"id\":\"tr-x\"}\n");
        fs::write(records.path(), bytes).unwrap();

        let scan = records.scan().unwrap();
        assert_eq!(scan.lines(), 4);
        assert_eq!(scan.malformed(), 3);
        let (line, task) = scan.tasks().next().unwrap();
        assert_eq!(line, 2);
        assert_eq!(task.id, "tr-good");
    }

    #[test]
    fn test_scan_keeps_snapshots_written_under_other_input_rules() {
        let (_temp_dir, records) = setup();
        let mut foreign = make_task("tr-foreign");
        foreign.labels.insert("needs review".to_string());
        foreign.title = "x".repeat(600);
        let mut broken = make_task("tr-broken");
        broken.status = Status::Closed;
        records.append(&[foreign.clone(), broken]).unwrap();

        let scan = records.scan().unwrap();
        assert_eq!(scan.malformed(), 1);
        let kept: Vec<_> = scan.tasks().map(|(_, t)| t).collect();
        assert_eq!(kept, vec![&foreign]);
    }

    #[test]
    fn test_append_repairs_missing_trailing_newline() {
        let (_temp_dir, records) = setup();
        let first = serde_json::to_string(&make_task("tr-0001")).unwrap();
        fs::write(records.path(), first).unwrap();

        records.append(&[make_task("tr-0002")]).unwrap();

        let scan = records.scan().unwrap();
        assert_eq!(scan.malformed(), 0);
        assert_eq!(scan.tasks().count(), 2);
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let (_temp_dir, records) = setup();
        records
            .append(&[make_task("tr-0001"), make_task("tr-0001"), make_task("tr-0002")])
            .unwrap();

        let written = records.rewrite(&[make_task("tr-0002")]).unwrap();

        let scan = records.scan().unwrap();
        assert_eq!(scan.lines(), 1);
        assert_eq!(scan.bytes, written);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let (_temp_dir, records) = setup();
        records.ensure().unwrap();
        let empty = records.fingerprint().unwrap();

        records.append(&[make_task("tr-0001")]).unwrap();
        let after = records.fingerprint().unwrap();

        assert_ne!(empty, after);
        assert_eq!(after, records.scan().unwrap().fingerprint);
        assert_eq!(after.len(), 64);
    }
}
