//! CLI argument parsing for Trellis.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trellis::{DepType, Status, TaskType};

#[derive(Parser)]
#[command(
    name = "trl",
    about = "A git-backed task graph shared by independent agents",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/trellis/logs/trellis.log"
)]
pub struct Cli {
    /// Directory containing .trellis (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a store in the current directory
    Init {
        /// ID prefix for this store
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Create a new task
    Create {
        /// Task title
        title: String,

        /// Priority (0=critical, 4=backlog)
        #[arg(short, long, default_value = "2")]
        priority: u8,

        /// Task type (task, bug, feature, epic, message)
        #[arg(short = 't', long = "type", default_value = "task")]
        task_type: TaskType,

        /// Labels (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        labels: Option<Vec<String>>,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Parent epic ID
        #[arg(long)]
        parent: Option<String>,

        /// Reference into another tracker
        #[arg(long)]
        external_ref: Option<String>,
    },

    /// Show a task by ID
    Show {
        /// Task ID
        id: String,
    },

    /// List tasks
    List {
        /// Filter by status (open, in_progress, closed)
        #[arg(short, long)]
        status: Option<Status>,

        /// Filter by type
        #[arg(short = 't', long = "type")]
        task_type: Option<TaskType>,

        /// Require labels (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        labels: Option<Vec<String>>,

        /// Filter by assignee
        #[arg(short, long)]
        assignee: Option<String>,

        /// Children of this epic
        #[arg(long)]
        parent: Option<String>,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Change task fields
    Update {
        /// Task ID
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short = 'D', long)]
        description: Option<String>,

        #[arg(short, long)]
        priority: Option<u8>,

        #[arg(short = 't', long = "type")]
        task_type: Option<TaskType>,

        /// Replace labels (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        labels: Option<Vec<String>>,

        #[arg(long)]
        parent: Option<String>,

        #[arg(long)]
        external_ref: Option<String>,
    },

    /// Take an open task
    Claim {
        /// Task ID
        id: String,

        /// Agent identity
        agent: String,
    },

    /// Return a task to the open pool
    Release {
        /// Task ID
        id: String,
    },

    /// Close a task
    Close {
        /// Task ID
        id: String,

        /// Reason for closing
        #[arg(short, long)]
        reason: String,
    },

    /// Delete a task and every edge touching it
    Delete {
        /// Task ID
        id: String,
    },

    /// Show tasks that are ready to work on
    Ready {
        /// Require labels (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        labels: Option<Vec<String>>,

        #[arg(short = 't', long = "type")]
        task_type: Option<TaskType>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show tasks waiting on unresolved blockers
    Blocked,

    /// Manage dependencies
    #[command(subcommand)]
    Dep(DepCommand),

    /// Write local changes to tasks.jsonl
    Export {
        /// Rewrite the file with one line per task
        #[arg(long)]
        gc: bool,
    },

    /// Load tasks.jsonl into the index
    Import,

    /// Deduplicate tasks.jsonl
    Compact,

    /// Rebuild the index from tasks.jsonl
    Rebuild,
}

#[derive(Subcommand)]
pub enum DepCommand {
    /// FROM depends on TO
    Add {
        from: String,
        to: String,

        /// Edge type (blocks, related, discovered-from)
        #[arg(short = 't', long = "type", default_value = "blocks")]
        dep_type: DepType,
    },

    /// Remove an edge
    Remove {
        from: String,
        to: String,

        #[arg(short = 't', long = "type", default_value = "blocks")]
        dep_type: DepType,
    },

    /// Print the blocking tree under a task
    Tree {
        id: String,

        /// Walk towards dependents instead of blockers
        #[arg(long)]
        up: bool,

        #[arg(long)]
        max_depth: Option<usize>,
    },
}
