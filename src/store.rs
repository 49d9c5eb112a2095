//! High-level store API for Trellis.

use crate::claim;
use crate::clock;
use crate::compact::{self, CompactResult};
use crate::config::Config;
use crate::error::{StoreError, store_error};
use crate::graph::{self, BlockedTask, Direction, TreeNode};
use crate::id::IdGenerator;
use crate::index::{self, Index, META_NEEDS_REWRITE, META_RECORD_FINGERPRINT};
use crate::record::RecordStore;
use crate::sync::{self, ExportOptions, ExportReport, ImportReport};
use crate::types::{DepType, Dependency, Edge, Filter, NewTask, Status, Task, TaskPatch, ValidationError};
use eyre::{Context, Result, eyre};
use std::fs;
use std::path::{Path, PathBuf};

/// Storage directory name.
pub const TRELLIS_DIR: &str = ".trellis";

/// Record log, committed to version control.
const RECORD_FILE: &str = "tasks.jsonl";

/// Query index, local only.
const INDEX_FILE: &str = "index.db";

const CONFIG_FILE: &str = "config.yaml";

const GITIGNORE: &str = "index.db\nindex.db-wal\nindex.db-shm\n";

const GITATTRIBUTES: &str = "tasks.jsonl merge=union\n";

fn validation(e: ValidationError) -> eyre::Report {
    eyre!(StoreError::Validation(e))
}

fn not_found(id: &str) -> eyre::Report {
    eyre!(StoreError::NotFound(id.to_string()))
}

/// The main Trellis store.
///
/// One handle per thread or process. Every mutation runs in its own
/// IMMEDIATE transaction, so handles in different processes can write
/// concurrently; the losers wait up to the configured busy timeout.
pub struct Store {
    root: PathBuf,
    config: Config,
    ids: IdGenerator,
    index: Index,
    records: RecordStore,
}

impl Store {
    /// Initialize a new store in the given directory with default settings.
    pub fn init(root: &Path) -> Result<Self> {
        Self::init_with(root, Config::default())
    }

    /// Initialize a store with `config`.
    ///
    /// Safe to run on an existing store: files already present are kept,
    /// including `config.yaml`, and a record log that arrived through version
    /// control is imported into a fresh index.
    pub fn init_with(root: &Path, config: Config) -> Result<Self> {
        config.validate()?;

        let dir = root.join(TRELLIS_DIR);
        fs::create_dir_all(&dir).context("Failed to create .trellis directory")?;

        let records = RecordStore::new(dir.join(RECORD_FILE));
        records.ensure()?;

        let config_path = dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            let existing = Config::load(&config_path)?;
            if existing != config {
                log::warn!("keeping existing {}", config_path.display());
            }
            existing
        } else {
            config.save(&config_path)?;
            config
        };

        write_if_missing(&dir.join(".gitignore"), GITIGNORE)?;
        write_if_missing(&dir.join(".gitattributes"), GITATTRIBUTES)?;

        let mut store = Self::open_at(root, config, records)?;
        if sync::is_stale(&store.index, &store.records)? {
            sync::import(&mut store.index, &store.records)?;
        }
        log::info!("initialized store at {}", dir.display());
        Ok(store)
    }

    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(TRELLIS_DIR);
        if !dir.is_dir() {
            return Err(eyre!(StoreError::NotInitialized(root.to_path_buf())));
        }

        let config = Config::load(&dir.join(CONFIG_FILE))?;
        let records = RecordStore::new(dir.join(RECORD_FILE));
        let mut store = Self::open_at(root, config, records)?;

        if store.config.auto_import && sync::is_stale(&store.index, &store.records)? {
            log::info!("record log changed since last sync, importing");
            sync::import(&mut store.index, &store.records)?;
        }
        Ok(store)
    }

    fn open_at(root: &Path, config: Config, records: RecordStore) -> Result<Self> {
        let index_path = root.join(TRELLIS_DIR).join(INDEX_FILE);

        let index = match Index::open(&index_path, config.busy_timeout()) {
            Ok(index) => index,
            Err(e) if matches!(store_error(&e), Some(StoreError::IndexCorrupt(_))) => {
                log::warn!("{}; rebuilding from {}", e, records.path().display());
                remove_index_files(&index_path)?;
                let mut index = Index::open(&index_path, config.busy_timeout())?;
                sync::import(&mut index, &records)?;
                index
            }
            Err(e) => return Err(e),
        };

        let ids = IdGenerator::new(&config.prefix, config.id_width).map_err(validation)?;

        Ok(Self {
            root: root.to_path_buf(),
            config,
            ids,
            index,
            records,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path of the SQLite index file.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(TRELLIS_DIR).join(INDEX_FILE)
    }

    /// Path of the record log.
    pub fn record_path(&self) -> &Path {
        self.records.path()
    }

    /// Create a new task with a freshly minted ID.
    pub fn create(&mut self, new: NewTask) -> Result<Task> {
        let ids = &self.ids;
        let task = self.index.write("create", |tx| {
            let id = ids.mint(|candidate| index::task_exists(tx, candidate))?;

            let now = clock::now();
            let task = Task {
                id,
                title: new.title,
                description: new.description,
                status: Status::Open,
                priority: new.priority,
                task_type: new.task_type,
                assignee: None,
                parent_id: new.parent_id,
                labels: new.labels,
                external_ref: new.external_ref,
                created_at: now,
                updated_at: now,
                closed_at: None,
                close_reason: None,
                metadata: new.metadata,
                dependencies: vec![],
            };
            task.validate().map_err(validation)?;

            index::upsert_task(tx, &task)?;
            index::mark_dirty(tx, &task.id)?;
            Ok(task)
        })?;

        log::debug!("created {}", task.id);
        Ok(task)
    }

    /// Get a task by ID.
    pub fn get(&self, id: &str) -> Result<Option<Task>> {
        self.index.get_task(id)
    }

    /// List tasks matching `filter`, ordered by priority then age.
    pub fn list(&self, filter: &Filter) -> Result<Vec<Task>> {
        self.index.list_tasks(filter)
    }

    /// Count tasks matching `filter`.
    pub fn count(&self, filter: &Filter) -> Result<usize> {
        self.index.count_tasks(filter)
    }

    /// Apply `patch` to a task. An empty patch returns the task untouched.
    ///
    /// Only the fields the patch sets are held to the input rules, so a task
    /// imported with a label this clone would reject can still be edited.
    pub fn update(&mut self, id: &str, patch: TaskPatch) -> Result<Task> {
        if patch.is_empty() {
            return self.get(id)?.ok_or_else(|| not_found(id));
        }
        patch.validate().map_err(validation)?;

        self.index.write("update", |tx| {
            let mut task = index::load_task(tx, id)?.ok_or_else(|| not_found(id))?;
            patch.apply_to(&mut task);
            task.updated_at = clock::advance(task.updated_at);
            task.check_invariants().map_err(validation)?;

            index::upsert_task(tx, &task)?;
            index::mark_dirty(tx, id)?;
            Ok(task)
        })
    }

    /// Try to take an open task for `agent`; `false` means someone else has it.
    pub fn claim(&mut self, id: &str, agent: &str) -> Result<bool> {
        claim::claim(&mut self.index, id, agent)
    }

    /// Put a task back in the open pool. Any non-closed task can be released,
    /// whoever holds it; a closed task is rejected with `InvalidTransition`.
    pub fn release(&mut self, id: &str) -> Result<Task> {
        claim::release(&mut self.index, id)
    }

    /// Close a task. `reason` must not be empty.
    pub fn close(&mut self, id: &str, reason: &str) -> Result<Task> {
        claim::close(&mut self.index, id, reason)
    }

    /// Administrative delete.
    ///
    /// Removes the task and every edge that mentions it. Tasks that depended
    /// on it lose that dependency and are marked for export. The record log
    /// still holds the task's old lines, so the next export rewrites it.
    pub fn delete(&mut self, id: &str) -> Result<Task> {
        let task = self.index.write("delete", |tx| {
            let task = index::load_task(tx, id)?.ok_or_else(|| not_found(id))?;

            let mut dependents: Vec<String> = index::edges_to(tx, id, None)?
                .into_iter()
                .map(|e| e.from_id)
                .filter(|from| from != id)
                .collect();
            dependents.dedup();

            for from in dependents {
                if let Some(mut dependent) = index::load_task(tx, &from)? {
                    dependent.dependencies.retain(|d| d.to_id != id);
                    dependent.updated_at = clock::advance(dependent.updated_at);
                    index::upsert_task(tx, &dependent)?;
                    index::mark_dirty(tx, &from)?;
                }
            }

            index::delete_task(tx, id)?;
            index::add_tombstone(tx, id)?;
            index::set_meta(tx, META_NEEDS_REWRITE, "1")?;
            Ok(task)
        })?;

        log::info!("deleted {}", id);
        Ok(task)
    }

    /// Record that `from_id` depends on `to_id`. Idempotent per triple.
    ///
    /// `to_id` may be unknown locally; an unresolved blocker keeps `from_id`
    /// out of the ready set until it shows up closed.
    pub fn add_dependency(&mut self, from_id: &str, to_id: &str, dep_type: DepType) -> Result<Edge> {
        if from_id == to_id {
            return Err(validation(ValidationError::SelfDependency(from_id.to_string())));
        }

        self.index.write("add_dependency", |tx| {
            let mut task = index::load_task(tx, from_id)?.ok_or_else(|| not_found(from_id))?;

            if let Some(existing) = task.dependency(to_id, dep_type) {
                return Ok(Edge {
                    from_id: from_id.to_string(),
                    to_id: to_id.to_string(),
                    dep_type,
                    created_at: existing.created_at,
                });
            }

            if !index::task_exists(tx, to_id)? {
                log::debug!("{} now depends on {}, which is not present locally", from_id, to_id);
            }

            let now = clock::advance(task.updated_at);
            task.dependencies.push(Dependency {
                to_id: to_id.to_string(),
                dep_type,
                created_at: now,
            });
            task.normalize();
            task.updated_at = now;
            task.check_invariants().map_err(validation)?;

            index::upsert_task(tx, &task)?;
            index::mark_dirty(tx, from_id)?;
            Ok(Edge {
                from_id: from_id.to_string(),
                to_id: to_id.to_string(),
                dep_type,
                created_at: now,
            })
        })
    }

    /// Drop an edge. Returns whether it existed.
    pub fn remove_dependency(&mut self, from_id: &str, to_id: &str, dep_type: DepType) -> Result<bool> {
        self.index.write("remove_dependency", |tx| {
            let mut task = index::load_task(tx, from_id)?.ok_or_else(|| not_found(from_id))?;

            let before = task.dependencies.len();
            task.dependencies
                .retain(|d| !(d.to_id == to_id && d.dep_type == dep_type));
            if task.dependencies.len() == before {
                return Ok(false);
            }

            task.updated_at = clock::advance(task.updated_at);
            index::upsert_task(tx, &task)?;
            index::mark_dirty(tx, from_id)?;
            Ok(true)
        })
    }

    /// Outbound edges of a task.
    pub fn dependencies(&self, id: &str) -> Result<Vec<Edge>> {
        self.index.edges_from(id, None)
    }

    /// Inbound edges of a task.
    pub fn dependents(&self, id: &str) -> Result<Vec<Edge>> {
        self.index.edges_to(id, None)
    }

    /// Tasks ready to be claimed, most urgent first.
    pub fn ready(&self, filter: &Filter) -> Result<Vec<Task>> {
        graph::ready(self.index.conn(), filter)
    }

    /// Tasks held back by unresolved blockers.
    pub fn blocked(&self) -> Result<Vec<BlockedTask>> {
        graph::blocked(self.index.conn())
    }

    /// Walk `blocks` edges from `id`. `max_depth` defaults to the configured cap.
    pub fn dep_tree(&self, id: &str, direction: Direction, max_depth: Option<usize>) -> Result<Vec<TreeNode>> {
        let depth = max_depth.unwrap_or(self.config.max_tree_depth);
        graph::dep_tree(self.index.conn(), id, direction, depth)
    }

    /// Write local changes to the record log.
    pub fn export(&mut self, options: ExportOptions) -> Result<ExportReport> {
        sync::export(&mut self.index, &self.records, options)
    }

    /// Fold the record log into the index.
    pub fn import(&mut self) -> Result<ImportReport> {
        sync::import(&mut self.index, &self.records)
    }

    /// IDs changed locally since the last export.
    pub fn pending_export(&self) -> Result<Vec<String>> {
        self.index.dirty_ids()
    }

    /// Deduplicate the record log down to one line per task.
    pub fn compact(&mut self) -> Result<CompactResult> {
        let records = &self.records;
        // the writer lock keeps exports from appending mid-rewrite
        self.index.write("compact", |tx| {
            let in_sync = index::get_meta(tx, META_RECORD_FINGERPRINT)?.as_deref()
                == Some(records.fingerprint()?.as_str());
            let result = compact::compact(records)?;
            if in_sync {
                index::set_meta(tx, META_RECORD_FINGERPRINT, &records.fingerprint()?)?;
            }
            Ok(result)
        })
    }

    /// Throw the index away and rebuild it from the record log.
    ///
    /// Pending local changes are exported first when the index is readable
    /// enough to do so.
    pub fn rebuild(&mut self) -> Result<ImportReport> {
        if let Err(e) = sync::export(&mut self.index, &self.records, ExportOptions::default()) {
            log::warn!("could not export before rebuild, local changes may be lost: {:#}", e);
        }

        let index_path = self.index_path();
        // release the file before deleting it
        self.index = Index::open_in_memory()?;
        remove_index_files(&index_path)?;
        self.index = Index::open(&index_path, self.config.busy_timeout())?;

        let report = sync::import(&mut self.index, &self.records)?;
        self.index.vacuum()?;
        log::info!(
            "rebuilt index with {} task(s) and {} edge(s)",
            self.index.count_all_tasks()?,
            self.index.count_all_edges()?
        );
        Ok(report)
    }
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if !path.exists() {
        fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

fn remove_index_files(index_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = index_path.as_os_str().to_owned();
        name.push(suffix);
        let path = PathBuf::from(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
    Ok(())
}
