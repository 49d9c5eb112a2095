//! Trellis: a git-backed task graph shared by independent agents.
//!
//! Tasks live in two places. `.trellis/tasks.jsonl` is an append-only log of
//! task snapshots that is committed and merged like any other file (with
//! git's union merge). `.trellis/index.db` is a local SQLite projection of
//! that log, used for queries and for serializing writers across processes.
//! No server is involved; every operation is a short transaction.
//!
//! # Example
//!
//! ```no_run
//! use trellis::{DepType, ExportOptions, Filter, Store, StoreBuilderExt};
//! use std::path::Path;
//!
//! // Initialize a new store
//! let mut store = Store::init(Path::new(".")).unwrap();
//!
//! // Create tasks
//! let login = store.build("Implement login").priority(1).label("auth").create().unwrap();
//! let tests = store.build("Write tests").label("auth").create().unwrap();
//!
//! // Add a dependency
//! store.add_dependency(&tests.id, &login.id, DepType::Blocks).unwrap();
//!
//! // Query ready work and take some
//! let ready = store.ready(&Filter::new()).unwrap();
//! assert_eq!(ready[0].id, login.id);
//! assert!(store.claim(&login.id, "agent-1").unwrap());
//!
//! // Close it and publish the changes to tasks.jsonl
//! store.close(&login.id, "Implemented OAuth").unwrap();
//! store.export(ExportOptions::default()).unwrap();
//! ```

mod builder;
mod claim;
mod clock;
mod compact;
mod config;
mod error;
mod graph;
mod id;
mod index;
mod query;
mod record;
mod store;
mod sync;
mod types;

// Re-export public API
pub use builder::{StoreBuilderExt, TaskBuilder};
pub use compact::CompactResult;
pub use config::Config;
pub use error::{StoreError, store_error};
pub use graph::{BlockedTask, Direction, TreeNode};
pub use id::{IdGenerator, mint, validate_prefix};
pub use query::{Query, StoreQueryExt};
pub use store::{Store, TRELLIS_DIR};
pub use sync::{ExportOptions, ExportReport, ImportReport};
pub use types::{
    DepType, Dependency, Edge, Filter, MAX_PRIORITY, MAX_TITLE_LEN, NewTask, Status, Task, TaskPatch, TaskType,
    ValidationError,
};
