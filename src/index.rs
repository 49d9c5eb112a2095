//! Query index: the SQLite projection of the record log.
//!
//! The index holds current state only and can always be rebuilt from
//! `tasks.jsonl`. Writers go through [`Index::write`], which opens a
//! `BEGIN IMMEDIATE` transaction so that concurrent processes serialize on
//! SQLite's writer lock (bounded by the busy timeout) while readers proceed
//! under WAL.

use crate::clock;
use crate::error;
use crate::types::{DepType, Dependency, Edge, Filter, Status, Task, TaskType, ValidationError};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params, params_from_iter};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Fingerprint of the record log as of the last import or export.
pub(crate) const META_RECORD_FINGERPRINT: &str = "record_fingerprint";

/// Set after an administrative delete; the next export rewrites the log.
pub(crate) const META_NEEDS_REWRITE: &str = "needs_rewrite";

const TASK_COLUMNS: &str = "t.id, t.title, t.description, t.status, t.priority, t.task_type, t.assignee, \
     t.parent_id, t.external_ref, t.created_at, t.updated_at, t.closed_at, t.close_reason, t.metadata";

const ORDER_BY_READINESS: &str = " ORDER BY t.priority ASC, t.created_at ASC, t.id ASC";

/// Handle on the SQLite index.
pub struct Index {
    conn: Connection,
}

impl Index {
    /// Open (creating if needed) the index at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(error::sqlite)
            .with_context(|| format!("Failed to open index at {}", path.display()))?;

        let index = Self { conn };
        index.configure(busy_timeout)?;
        index.init_schema()?;
        Ok(index)
    }

    /// Open a private in-memory index.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(error::sqlite)?;
        let index = Self { conn };
        index.configure(Duration::ZERO)?;
        index.init_schema()?;
        Ok(index)
    }

    fn configure(&self, busy_timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(busy_timeout).map_err(error::sqlite)?;

        // journal_mode answers with a row, so it cannot go through execute()
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(error::sqlite)?;
        if mode != "wal" {
            log::debug!("index journal mode is {}", mode);
        }

        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")
            .map_err(error::sqlite)?;
        Ok(())
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL CHECK (status IN ('open', 'in_progress', 'closed')),
                    priority INTEGER NOT NULL CHECK (priority BETWEEN 0 AND 4),
                    task_type TEXT NOT NULL CHECK (task_type IN ('task', 'bug', 'feature', 'epic', 'message')),
                    assignee TEXT,
                    parent_id TEXT,
                    external_ref TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    closed_at TEXT,
                    close_reason TEXT,
                    metadata TEXT NOT NULL DEFAULT '{}'
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_status_priority ON tasks(status, priority);
                CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee);
                CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);

                CREATE TABLE IF NOT EXISTS labels (
                    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    label TEXT NOT NULL,
                    PRIMARY KEY (task_id, label)
                );
                CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label);

                CREATE TABLE IF NOT EXISTS dependencies (
                    from_id TEXT NOT NULL,
                    to_id TEXT NOT NULL,
                    dep_type TEXT NOT NULL CHECK (dep_type IN ('blocks', 'related', 'discovered-from')),
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (from_id, to_id, dep_type)
                );
                CREATE INDEX IF NOT EXISTS idx_dependencies_to ON dependencies(to_id, dep_type);

                CREATE TABLE IF NOT EXISTS dirty_tasks (
                    task_id TEXT PRIMARY KEY,
                    marked_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .map_err(error::sqlite)
            .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The writer lock is taken up front, so the check-then-write sequences in
    /// `f` are serialized against every other process. Returning an error
    /// rolls the transaction back.
    pub(crate) fn write<T, F>(&mut self, op: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(error::sqlite)?;
        let value = f(&tx)?;
        tx.commit().map_err(error::sqlite)?;
        log::debug!("{} committed", op);
        Ok(value)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Get a task by ID.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        load_task(&self.conn, id)
    }

    /// List tasks matching `filter`, most urgent first.
    pub fn list_tasks(&self, filter: &Filter) -> Result<Vec<Task>> {
        query_tasks(&self.conn, "1 = 1", filter)
    }

    /// Count tasks matching `filter` (limit/offset ignored).
    pub fn count_tasks(&self, filter: &Filter) -> Result<usize> {
        count_tasks(&self.conn, "1 = 1", filter)
    }

    pub fn count_all_tasks(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .map_err(error::sqlite)?;
        Ok(n as usize)
    }

    pub fn count_all_edges(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM dependencies", [], |row| row.get(0))
            .map_err(error::sqlite)?;
        Ok(n as usize)
    }

    /// Outbound edges of `id`, optionally of one type.
    pub fn edges_from(&self, id: &str, dep_type: Option<DepType>) -> Result<Vec<Edge>> {
        edges_from(&self.conn, id, dep_type)
    }

    /// Inbound edges of `id`, optionally of one type.
    pub fn edges_to(&self, id: &str, dep_type: Option<DepType>) -> Result<Vec<Edge>> {
        edges_to(&self.conn, id, dep_type)
    }

    /// IDs with local changes not yet exported.
    pub fn dirty_ids(&self) -> Result<Vec<String>> {
        dirty_ids(&self.conn)
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        get_meta(&self.conn, key)
    }

    /// Reclaim free pages.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM").map_err(error::sqlite)?;
        Ok(())
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    clock::from_sql(s).map_err(|e| conversion_error(idx, e))
}

fn parse_enum<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = ValidationError>,
{
    s.parse().map_err(|e| conversion_error(idx, e))
}

/// Convert a database row to a Task (labels and dependencies not loaded).
fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let task_type: String = row.get(5)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    let closed_at: Option<String> = row.get(11)?;
    let metadata: String = row.get(13)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: parse_enum::<Status>(3, &status)?,
        priority: row.get(4)?,
        task_type: parse_enum::<TaskType>(5, &task_type)?,
        assignee: row.get(6)?,
        parent_id: row.get(7)?,
        labels: Default::default(),
        external_ref: row.get(8)?,
        created_at: parse_ts(9, &created_at)?,
        updated_at: parse_ts(10, &updated_at)?,
        closed_at: closed_at.as_deref().map(|s| parse_ts(11, s)).transpose()?,
        close_reason: row.get(12)?,
        metadata: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&metadata)
            .map_err(|e| conversion_error(13, e))?,
        dependencies: vec![],
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    let dep_type: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(Edge {
        from_id: row.get(0)?,
        to_id: row.get(1)?,
        dep_type: parse_enum::<DepType>(2, &dep_type)?,
        created_at: parse_ts(3, &created_at)?,
    })
}

/// Fill in labels and outbound dependencies.
fn hydrate(conn: &Connection, task: &mut Task) -> Result<()> {
    let mut label_stmt = conn
        .prepare_cached("SELECT label FROM labels WHERE task_id = ?")
        .map_err(error::sqlite)?;
    task.labels = label_stmt
        .query_map(params![task.id], |row| row.get(0))
        .map_err(error::sqlite)?
        .collect::<rusqlite::Result<_>>()
        .map_err(error::sqlite)?;

    task.dependencies = edges_from(conn, &task.id, None)?
        .into_iter()
        .map(|e| Dependency {
            to_id: e.to_id,
            dep_type: e.dep_type,
            created_at: e.created_at,
        })
        .collect();
    task.normalize();
    Ok(())
}

fn collect_tasks(conn: &Connection, sql: &str, args: &[SqlValue]) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(sql).map_err(error::sqlite)?;
    let mut tasks = stmt
        .query_map(params_from_iter(args.iter()), row_to_task)
        .map_err(error::sqlite)?
        .collect::<rusqlite::Result<Vec<Task>>>()
        .map_err(error::sqlite)?;

    for task in &mut tasks {
        hydrate(conn, task)?;
    }
    Ok(tasks)
}

/// Load one task with labels and dependencies.
pub(crate) fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks t WHERE t.id = ?", TASK_COLUMNS);
    let task = conn
        .query_row(&sql, params![id], row_to_task)
        .optional()
        .map_err(error::sqlite)?;

    match task {
        Some(mut task) => {
            hydrate(conn, &mut task)?;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

pub(crate) fn task_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM tasks WHERE id = ?", params![id], |row| row.get(0))
        .optional()
        .map_err(error::sqlite)?;
    Ok(found.is_some())
}

/// Translate a filter into `AND`-able SQL over alias `t`.
fn filter_sql(filter: &Filter, args: &mut Vec<SqlValue>) -> String {
    let mut clauses: Vec<&str> = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("t.status = ?");
        args.push(SqlValue::Text(status.as_str().to_string()));
    }
    if let Some(task_type) = filter.task_type {
        clauses.push("t.task_type = ?");
        args.push(SqlValue::Text(task_type.as_str().to_string()));
    }
    if let Some(labels) = &filter.labels {
        for label in labels {
            clauses.push("EXISTS (SELECT 1 FROM labels l WHERE l.task_id = t.id AND l.label = ?)");
            args.push(SqlValue::Text(label.clone()));
        }
    }
    if let Some(min) = filter.min_priority {
        clauses.push("t.priority >= ?");
        args.push(SqlValue::Integer(min as i64));
    }
    if let Some(max) = filter.max_priority {
        clauses.push("t.priority <= ?");
        args.push(SqlValue::Integer(max as i64));
    }
    if let Some(assignee) = &filter.assignee {
        clauses.push("t.assignee = ?");
        args.push(SqlValue::Text(assignee.clone()));
    }
    if let Some(parent_id) = &filter.parent_id {
        clauses.push("t.parent_id = ?");
        args.push(SqlValue::Text(parent_id.clone()));
    }
    if let Some(substring) = &filter.title_contains {
        clauses.push("instr(lower(t.title), lower(?)) > 0");
        args.push(SqlValue::Text(substring.clone()));
    }

    clauses.join(" AND ")
}

/// Select tasks satisfying `condition` (SQL over alias `t`) and `filter`,
/// ordered by priority, then age, then id.
pub(crate) fn query_tasks(conn: &Connection, condition: &str, filter: &Filter) -> Result<Vec<Task>> {
    let mut args = Vec::new();
    let mut sql = format!("SELECT {} FROM tasks t WHERE {}", TASK_COLUMNS, condition);

    let extra = filter_sql(filter, &mut args);
    if !extra.is_empty() {
        sql.push_str(" AND ");
        sql.push_str(&extra);
    }
    sql.push_str(ORDER_BY_READINESS);

    if filter.limit.is_some() || filter.offset.is_some() {
        sql.push_str(" LIMIT ? OFFSET ?");
        args.push(SqlValue::Integer(filter.limit.map(|l| l as i64).unwrap_or(-1)));
        args.push(SqlValue::Integer(filter.offset.unwrap_or(0) as i64));
    }

    collect_tasks(conn, &sql, &args)
}

pub(crate) fn count_tasks(conn: &Connection, condition: &str, filter: &Filter) -> Result<usize> {
    let mut args = Vec::new();
    let mut sql = format!("SELECT COUNT(*) FROM tasks t WHERE {}", condition);

    let extra = filter_sql(filter, &mut args);
    if !extra.is_empty() {
        sql.push_str(" AND ");
        sql.push_str(&extra);
    }

    let n: i64 = conn
        .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))
        .map_err(error::sqlite)?;
    Ok(n as usize)
}

/// Every task, oldest first; the record log's canonical order.
pub(crate) fn all_tasks(conn: &Connection) -> Result<Vec<Task>> {
    let sql = format!("SELECT {} FROM tasks t ORDER BY t.created_at ASC, t.id ASC", TASK_COLUMNS);
    collect_tasks(conn, &sql, &[])
}

/// Insert or overwrite a task row, replacing its labels and outbound edges.
pub(crate) fn upsert_task(conn: &Connection, task: &Task) -> Result<()> {
    let metadata = serde_json::to_string(&task.metadata).context("Failed to serialize metadata")?;

    conn.execute(
        r#"
        INSERT INTO tasks (id, title, description, status, priority, task_type, assignee, parent_id,
                           external_ref, created_at, updated_at, closed_at, close_reason, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            status = excluded.status,
            priority = excluded.priority,
            task_type = excluded.task_type,
            assignee = excluded.assignee,
            parent_id = excluded.parent_id,
            external_ref = excluded.external_ref,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            closed_at = excluded.closed_at,
            close_reason = excluded.close_reason,
            metadata = excluded.metadata
        "#,
        params![
            task.id,
            task.title,
            task.description,
            task.status.as_str(),
            task.priority,
            task.task_type.as_str(),
            task.assignee,
            task.parent_id,
            task.external_ref,
            clock::to_sql(&task.created_at),
            clock::to_sql(&task.updated_at),
            task.closed_at.as_ref().map(clock::to_sql),
            task.close_reason,
            metadata,
        ],
    )
    .map_err(error::sqlite)?;

    conn.execute("DELETE FROM labels WHERE task_id = ?", params![task.id])
        .map_err(error::sqlite)?;
    for label in &task.labels {
        conn.execute(
            "INSERT INTO labels (task_id, label) VALUES (?, ?)",
            params![task.id, label],
        )
        .map_err(error::sqlite)?;
    }

    conn.execute("DELETE FROM dependencies WHERE from_id = ?", params![task.id])
        .map_err(error::sqlite)?;
    for dep in &task.dependencies {
        insert_dependency(
            conn,
            &Edge {
                from_id: task.id.clone(),
                to_id: dep.to_id.clone(),
                dep_type: dep.dep_type,
                created_at: dep.created_at,
            },
        )?;
    }

    Ok(())
}

/// Insert an edge; returns false when the triple already existed.
pub(crate) fn insert_dependency(conn: &Connection, edge: &Edge) -> Result<bool> {
    let changed = conn
        .execute(
            "INSERT OR IGNORE INTO dependencies (from_id, to_id, dep_type, created_at) VALUES (?, ?, ?, ?)",
            params![
                edge.from_id,
                edge.to_id,
                edge.dep_type.as_str(),
                clock::to_sql(&edge.created_at)
            ],
        )
        .map_err(error::sqlite)?;
    Ok(changed > 0)
}

/// Delete a task row with its labels and every edge that mentions it.
pub(crate) fn delete_task(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM dependencies WHERE from_id = ?1 OR to_id = ?1",
        params![id],
    )
    .map_err(error::sqlite)?;
    conn.execute("DELETE FROM labels WHERE task_id = ?", params![id])
        .map_err(error::sqlite)?;
    conn.execute("DELETE FROM dirty_tasks WHERE task_id = ?", params![id])
        .map_err(error::sqlite)?;
    conn.execute("DELETE FROM tasks WHERE id = ?", params![id])
        .map_err(error::sqlite)?;
    Ok(())
}

fn edge_query(conn: &Connection, column: &str, id: &str, dep_type: Option<DepType>) -> Result<Vec<Edge>> {
    let base = format!(
        "SELECT from_id, to_id, dep_type, created_at FROM dependencies WHERE {} = ?1",
        column
    );
    let rows = match dep_type {
        Some(dep_type) => {
            let sql = format!("{} AND dep_type = ?2 ORDER BY from_id, to_id, dep_type", base);
            let mut stmt = conn.prepare_cached(&sql).map_err(error::sqlite)?;
            stmt.query_map(params![id, dep_type.as_str()], row_to_edge)
                .map_err(error::sqlite)?
                .collect::<rusqlite::Result<Vec<_>>>()
        }
        None => {
            let sql = format!("{} ORDER BY from_id, to_id, dep_type", base);
            let mut stmt = conn.prepare_cached(&sql).map_err(error::sqlite)?;
            stmt.query_map(params![id], row_to_edge)
                .map_err(error::sqlite)?
                .collect::<rusqlite::Result<Vec<_>>>()
        }
    };
    rows.map_err(error::sqlite)
}

pub(crate) fn edges_from(conn: &Connection, id: &str, dep_type: Option<DepType>) -> Result<Vec<Edge>> {
    edge_query(conn, "from_id", id, dep_type)
}

pub(crate) fn edges_to(conn: &Connection, id: &str, dep_type: Option<DepType>) -> Result<Vec<Edge>> {
    edge_query(conn, "to_id", id, dep_type)
}

/// Record that `id` changed locally and needs exporting.
pub(crate) fn mark_dirty(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO dirty_tasks (task_id, marked_at) VALUES (?, ?)",
        params![id, clock::to_sql(&clock::now())],
    )
    .map_err(error::sqlite)?;
    Ok(())
}

pub(crate) fn unmark_dirty(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM dirty_tasks WHERE task_id = ?", params![id])
        .map_err(error::sqlite)?;
    Ok(())
}

pub(crate) fn clear_dirty(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM dirty_tasks", []).map_err(error::sqlite)?;
    Ok(())
}

pub(crate) fn dirty_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT task_id FROM dirty_tasks ORDER BY task_id")
        .map_err(error::sqlite)?;
    let ids = stmt
        .query_map([], |row| row.get(0))
        .map_err(error::sqlite)?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(error::sqlite)?;
    Ok(ids)
}

pub(crate) fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| row.get(0))
        .optional()
        .map_err(error::sqlite)
}

pub(crate) fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        params![key, value],
    )
    .map_err(error::sqlite)?;
    Ok(())
}

pub(crate) fn delete_meta(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM meta WHERE key = ?", params![key])
        .map_err(error::sqlite)?;
    Ok(())
}

fn tombstone_key(id: &str) -> String {
    format!("tombstone:{}", id)
}

/// Remember that `id` was deleted while its lines are still in the log.
pub(crate) fn add_tombstone(conn: &Connection, id: &str) -> Result<()> {
    set_meta(conn, &tombstone_key(id), &clock::to_sql(&clock::now()))
}

pub(crate) fn is_tombstoned(conn: &Connection, id: &str) -> Result<bool> {
    Ok(get_meta(conn, &tombstone_key(id))?.is_some())
}

/// Forget all deletions; called once the log no longer holds their lines.
pub(crate) fn clear_tombstones(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM meta WHERE key LIKE 'tombstone:%'", [])
        .map_err(error::sqlite)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn make_task(id: &str, priority: u8) -> Task {
        let now = clock::now();
        Task {
            id: id.to_string(),
            title: format!("Task {}", id),
            description: None,
            status: Status::Open,
            priority,
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

    fn put(index: &mut Index, task: &Task) {
        index.write("test", |tx| upsert_task(tx, task)).unwrap();
    }

    #[test]
    fn test_open_creates_file_in_wal_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.db");
        let index = Index::open(&path, Duration::from_millis(100)).unwrap();

        assert!(path.exists());
        let mode: String = index
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_required_indexes_exist() {
        let index = Index::open_in_memory().unwrap();
        let mut stmt = index
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'")
            .unwrap();
        let names: BTreeSet<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        for name in [
            "idx_tasks_status_priority",
            "idx_tasks_assignee",
            "idx_tasks_parent",
            "idx_dependencies_to",
        ] {
            assert!(names.contains(name), "missing index {}", name);
        }
    }

    #[test]
    fn test_upsert_and_load_full_task() {
        let mut index = Index::open_in_memory().unwrap();

        let mut task = make_task("tr-0001", 1);
        task.description = Some("A test description".to_string());
        task.labels = ["test", "example"].into_iter().map(String::from).collect();
        task.metadata.insert("estimate".to_string(), serde_json::json!(3.5));
        task.dependencies.push(Dependency {
            to_id: "tr-9999".to_string(),
            dep_type: DepType::Blocks,
            created_at: task.created_at,
        });
        put(&mut index, &task);

        let loaded = index.get_task("tr-0001").unwrap().unwrap();
        assert_eq!(loaded, task);
    }

    #[test]
    fn test_upsert_replaces_labels_and_edges() {
        let mut index = Index::open_in_memory().unwrap();

        let mut task = make_task("tr-0001", 2);
        task.labels.insert("old".to_string());
        task.dependencies.push(Dependency {
            to_id: "tr-0002".to_string(),
            dep_type: DepType::Related,
            created_at: task.created_at,
        });
        put(&mut index, &task);

        task.labels = ["new".to_string()].into_iter().collect();
        task.dependencies.clear();
        put(&mut index, &task);

        let loaded = index.get_task("tr-0001").unwrap().unwrap();
        assert_eq!(loaded.labels.iter().collect::<Vec<_>>(), vec!["new"]);
        assert!(loaded.dependencies.is_empty());
        assert_eq!(index.count_all_edges().unwrap(), 0);
    }

    #[test]
    fn test_insert_dependency_is_idempotent() {
        let mut index = Index::open_in_memory().unwrap();
        let edge = Edge {
            from_id: "tr-x".to_string(),
            to_id: "tr-y".to_string(),
            dep_type: DepType::Blocks,
            created_at: clock::now(),
        };

        let first = index.write("test", |tx| insert_dependency(tx, &edge)).unwrap();
        let second = index.write("test", |tx| insert_dependency(tx, &edge)).unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(index.edges_from("tr-x", None).unwrap().len(), 1);
        assert_eq!(index.edges_to("tr-y", Some(DepType::Blocks)).unwrap().len(), 1);
    }

    #[test]
    fn test_list_ordering_and_filters() {
        let mut index = Index::open_in_memory().unwrap();

        let mut low = make_task("tr-low", 3);
        low.labels.insert("backend".to_string());
        let urgent = make_task("tr-urg", 0);
        let mut bug = make_task("tr-bug", 1);
        bug.task_type = TaskType::Bug;
        bug.labels.insert("backend".to_string());
        for task in [&low, &urgent, &bug] {
            put(&mut index, task);
        }

        let all = index.list_tasks(&Filter::new()).unwrap();
        let ids: Vec<_> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["tr-urg", "tr-bug", "tr-low"]);

        let backend = index.list_tasks(&Filter::new().label("backend")).unwrap();
        assert_eq!(backend.len(), 2);

        let bugs = index.list_tasks(&Filter::new().task_type(TaskType::Bug)).unwrap();
        assert_eq!(bugs.len(), 1);

        let page = index.list_tasks(&Filter::new().offset(1).limit(1)).unwrap();
        assert_eq!(page[0].id, "tr-bug");

        assert_eq!(index.count_tasks(&Filter::new().max_priority(1)).unwrap(), 2);
    }

    #[test]
    fn test_delete_task_cascades_edges() {
        let mut index = Index::open_in_memory().unwrap();

        let a = make_task("tr-a", 2);
        let mut b = make_task("tr-b", 2);
        b.dependencies.push(Dependency {
            to_id: "tr-a".to_string(),
            dep_type: DepType::Blocks,
            created_at: b.created_at,
        });
        put(&mut index, &a);
        put(&mut index, &b);

        index.write("test", |tx| delete_task(tx, "tr-a")).unwrap();

        assert!(index.get_task("tr-a").unwrap().is_none());
        assert_eq!(index.count_all_edges().unwrap(), 0);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut index = Index::open_in_memory().unwrap();

        index
            .write("test", |tx| {
                mark_dirty(tx, "tr-b")?;
                mark_dirty(tx, "tr-a")?;
                mark_dirty(tx, "tr-a")
            })
            .unwrap();
        assert_eq!(index.dirty_ids().unwrap(), vec!["tr-a", "tr-b"]);

        index.write("test", |tx| unmark_dirty(tx, "tr-a")).unwrap();
        assert_eq!(index.dirty_ids().unwrap(), vec!["tr-b"]);

        index.write("test", |tx| clear_dirty(tx)).unwrap();
        assert!(index.dirty_ids().unwrap().is_empty());
    }

    #[test]
    fn test_meta_roundtrip() {
        let mut index = Index::open_in_memory().unwrap();
        assert_eq!(index.get_meta("k").unwrap(), None);

        index.write("test", |tx| set_meta(tx, "k", "v")).unwrap();
        assert_eq!(index.get_meta("k").unwrap().as_deref(), Some("v"));

        index.write("test", |tx| delete_meta(tx, "k")).unwrap();
        assert_eq!(index.get_meta("k").unwrap(), None);
    }

    #[test]
    fn test_tombstones() {
        let mut index = Index::open_in_memory().unwrap();

        index
            .write("test", |tx| {
                set_meta(tx, META_NEEDS_REWRITE, "1")?;
                add_tombstone(tx, "tr-gone")
            })
            .unwrap();
        assert!(is_tombstoned(index.conn(), "tr-gone").unwrap());
        assert!(!is_tombstoned(index.conn(), "tr-here").unwrap());

        index.write("test", |tx| clear_tombstones(tx)).unwrap();
        assert!(!is_tombstoned(index.conn(), "tr-gone").unwrap());
        assert_eq!(index.get_meta(META_NEEDS_REWRITE).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_garbage_file_reports_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.db");
        std::fs::write(&path, vec![0x5a_u8; 8192]).unwrap();

        let err = Index::open(&path, Duration::from_millis(100)).err().unwrap();
        assert!(err.chain().any(|e| matches!(
            e.downcast_ref::<crate::StoreError>(),
            Some(crate::StoreError::IndexCorrupt(_))
        )));
    }
}
