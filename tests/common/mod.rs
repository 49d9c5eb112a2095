//! Shared test infrastructure for Trellis integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use trellis::{
    Config, DepType, Edge, ExportOptions, Filter, Status, Store, StoreBuilderExt, TRELLIS_DIR, Task,
};

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        Self { temp_dir, store }
    }

    /// Create a test environment with custom settings.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init_with(temp_dir.path(), config).expect("Failed to init store");
        Self { temp_dir, store }
    }

    /// A second checkout of the same repository: copies the record log into
    /// a fresh directory and initializes a store over it.
    pub fn clone_env(&self) -> TestEnv {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().join(TRELLIS_DIR);
        fs::create_dir_all(&dir).expect("Failed to create .trellis");
        fs::copy(self.store.record_path(), dir.join("tasks.jsonl")).expect("Failed to copy record log");
        let store = Store::init(temp_dir.path()).expect("Failed to init clone");
        TestEnv { temp_dir, store }
    }

    /// A fresh checkout whose record log holds exactly `contents`.
    pub fn from_record_log(contents: &str) -> TestEnv {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().join(TRELLIS_DIR);
        fs::create_dir_all(&dir).expect("Failed to create .trellis");
        fs::write(dir.join("tasks.jsonl"), contents).expect("Failed to write record log");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        TestEnv { temp_dir, store }
    }

    /// Open another handle on the same directory.
    pub fn reopen(&self) -> Store {
        Store::open(self.temp_dir.path()).expect("Failed to reopen store")
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a task with default priority and no labels.
    pub fn create_task(&mut self, title: &str) -> Task {
        self.store.build(title).create().expect("Failed to create task")
    }

    /// Create a task with specified priority.
    pub fn create_task_with_priority(&mut self, title: &str, priority: u8) -> Task {
        self.store
            .build(title)
            .priority(priority)
            .create()
            .expect("Failed to create task")
    }

    /// Create a task with labels.
    pub fn create_task_with_labels(&mut self, title: &str, labels: &[&str]) -> Task {
        self.store
            .build(title)
            .labels(labels.iter().copied())
            .create()
            .expect("Failed to create task")
    }

    /// `from` waits on `to`.
    pub fn add_blocking_dep(&mut self, from: &Task, to: &Task) -> Edge {
        self.store
            .add_dependency(&from.id, &to.id, DepType::Blocks)
            .expect("Failed to add dependency")
    }

    /// Close a task.
    pub fn close_task(&mut self, task: &Task) -> Task {
        self.store.close(&task.id, "done").expect("Failed to close task")
    }

    /// Write pending changes to the record log.
    pub fn export(&mut self) {
        self.store
            .export(ExportOptions::default())
            .expect("Failed to export");
    }

    pub fn record_log(&self) -> String {
        fs::read_to_string(self.store.record_path()).expect("Failed to read record log")
    }

    /// Replace the record log wholesale.
    pub fn write_record_log(&self, contents: &str) {
        fs::write(self.store.record_path(), contents).expect("Failed to write record log");
    }

    /// Append raw text to the record log, as a merge or another writer would.
    pub fn append_record_log(&self, text: &str) {
        let mut contents = self.record_log();
        contents.push_str(text);
        self.write_record_log(&contents);
    }

    /// Assert that a task is in the ready list.
    pub fn assert_ready(&self, task: &Task) {
        let ready = self.store.ready(&Filter::new()).expect("Failed to get ready tasks");
        assert!(
            ready.iter().any(|t| t.id == task.id),
            "Expected task {} to be ready, but it wasn't. Ready tasks: {:?}",
            task.id,
            ready.iter().map(|t| &t.id).collect::<Vec<_>>()
        );
    }

    /// Assert that a task is NOT in the ready list.
    pub fn assert_not_ready(&self, task: &Task) {
        let ready = self.store.ready(&Filter::new()).expect("Failed to get ready tasks");
        assert!(
            !ready.iter().any(|t| t.id == task.id),
            "Expected task {} to NOT be ready, but it was",
            task.id
        );
    }

    /// Assert that a task is in the blocked list.
    pub fn assert_blocked(&self, task: &Task) {
        let blocked = self.store.blocked().expect("Failed to get blocked tasks");
        assert!(
            blocked.iter().any(|b| b.task.id == task.id),
            "Expected task {} to be blocked, but it wasn't",
            task.id
        );
    }

    /// Get count of ready tasks.
    pub fn ready_count(&self) -> usize {
        self.store.ready(&Filter::new()).expect("Failed to get ready tasks").len()
    }

    /// Get count of all tasks.
    pub fn total_count(&self) -> usize {
        self.store.count(&Filter::new()).expect("Failed to count tasks")
    }

    pub fn count_by_status(&self, status: Status) -> usize {
        self.store
            .count(&Filter::new().status(status))
            .expect("Failed to count tasks")
    }

    /// Fetch a task that must exist.
    pub fn get(&self, id: &str) -> Task {
        self.store
            .get(id)
            .expect("Failed to get task")
            .unwrap_or_else(|| panic!("task {} not found", id))
    }
}

/// Interleave two logs the way git's union merge does: every line of both
/// sides, in the order given.
pub fn union(first: &str, second: &str) -> String {
    let mut merged = String::new();
    for line in first.lines().chain(second.lines()) {
        if !line.trim().is_empty() && !merged.lines().any(|existing| existing == line) {
            merged.push_str(line);
            merged.push('\n');
        }
    }
    merged
}
