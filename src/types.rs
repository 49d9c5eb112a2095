//! Core data types for the Trellis task graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 500;

/// Lowest (least urgent) priority.
pub const MAX_PRIORITY: u8 = 4;

/// The atomic unit of trackable work.
///
/// A `Task` is also the snapshot format of the record log: each line of
/// `tasks.jsonl` is one serialized `Task`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Namespace prefix + "-" + base36 suffix, immutable.
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: Status,

    /// Priority 0-4 (0 = critical, 4 = backlog)
    pub priority: u8,

    #[serde(rename = "type", default)]
    pub task_type: TaskType,

    /// Only set while `status == InProgress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// Parent epic, possibly not visible locally yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,

    /// Reference into a foreign system, e.g. "gh-142".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,

    /// Open extension map for layered features.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    /// Outbound edges: this task depends on each `to_id`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

/// Task status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Closed => "closed",
        }
    }

    /// Check if a status transition is valid.
    pub fn can_transition_to(&self, target: &Status) -> bool {
        use Status::*;
        match (self, target) {
            (Open, InProgress) => true,
            (Open, Closed) => true,

            (InProgress, Open) => true,
            (InProgress, Closed) => true,

            // Closed is terminal
            (Closed, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Status::Open),
            "in_progress" => Ok(Status::InProgress),
            "closed" => Ok(Status::Closed),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

/// Kinds of work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Task,
    Bug,
    Feature,
    Epic,
    Message,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Task => "task",
            TaskType::Bug => "bug",
            TaskType::Feature => "feature",
            TaskType::Epic => "epic",
            TaskType::Message => "message",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(TaskType::Task),
            "bug" => Ok(TaskType::Bug),
            "feature" => Ok(TaskType::Feature),
            "epic" => Ok(TaskType::Epic),
            "message" => Ok(TaskType::Message),
            other => Err(ValidationError::InvalidType(other.to_string())),
        }
    }
}

/// An outbound dependency edge, stored on the dependent task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    /// The task being depended on
    pub to_id: String,

    #[serde(rename = "type")]
    pub dep_type: DepType,

    pub created_at: DateTime<Utc>,
}

/// A dependency edge viewed from the index: `from_id` depends on `to_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub from_id: String,
    pub to_id: String,
    pub dep_type: DepType,
    pub created_at: DateTime<Utc>,
}

/// Types of relationships between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepType {
    /// to_id blocks from_id (from can't start until to closes)
    Blocks,

    /// Informational link, no blocking semantics
    Related,

    /// from_id was discovered while working on to_id
    DiscoveredFrom,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Blocks => "blocks",
            DepType::Related => "related",
            DepType::DiscoveredFrom => "discovered-from",
        }
    }

    /// Returns true if this edge type affects ready() calculation.
    pub fn is_blocking(&self) -> bool {
        matches!(self, DepType::Blocks)
    }
}

impl fmt::Display for DepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocks" => Ok(DepType::Blocks),
            "related" => Ok(DepType::Related),
            "discovered-from" => Ok(DepType::DiscoveredFrom),
            other => Err(ValidationError::InvalidDepType(other.to_string())),
        }
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub task_type: TaskType,
    pub priority: u8,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub external_ref: Option<String>,
    pub labels: BTreeSet<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl NewTask {
    /// A plain task at default priority 2.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            task_type: TaskType::Task,
            priority: 2,
            description: None,
            parent_id: None,
            external_ref: None,
            labels: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A partial field set for `update`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<u8>,
    pub task_type: Option<TaskType>,
    pub parent_id: Option<Option<String>>,
    pub external_ref: Option<Option<String>>,
    /// Replaces the whole label set.
    pub labels: Option<BTreeSet<String>>,
    /// Merged key by key; a `null` value removes the key.
    pub metadata: BTreeMap<String, Value>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(Some(description.into()));
        self
    }

    pub fn clear_description(mut self) -> Self {
        self.description = Some(None);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(Some(parent_id.into()));
        self
    }

    pub fn clear_parent(mut self) -> Self {
        self.parent_id = Some(None);
        self
    }

    pub fn external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(Some(external_ref.into()));
        self
    }

    pub fn clear_external_ref(mut self) -> Self {
        self.external_ref = Some(None);
        self
    }

    pub fn labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Input rules for the fields this patch sets.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(bad) = self.labels.iter().flatten().find(|l| !is_valid_label(l)) {
            return Err(ValidationError::InvalidLabel(bad.clone()));
        }
        Ok(())
    }

    /// Apply the patch onto `task` (timestamps are the caller's concern).
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(task_type) = self.task_type {
            task.task_type = task_type;
        }
        if let Some(parent_id) = &self.parent_id {
            task.parent_id = parent_id.clone();
        }
        if let Some(external_ref) = &self.external_ref {
            task.external_ref = external_ref.clone();
        }
        if let Some(labels) = &self.labels {
            task.labels = labels.clone();
        }
        for (key, value) in &self.metadata {
            if value.is_null() {
                task.metadata.remove(key);
            } else {
                task.metadata.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Filter for `list` and `ready` queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub status: Option<Status>,
    pub task_type: Option<TaskType>,
    /// All listed labels must be present.
    pub labels: Option<Vec<String>>,
    pub min_priority: Option<u8>,
    pub max_priority: Option<u8>,
    pub assignee: Option<String>,
    pub parent_id: Option<String>,
    pub title_contains: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.get_or_insert_with(Vec::new).push(label.into());
        self
    }

    pub fn labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.labels
            .get_or_insert_with(Vec::new)
            .extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn min_priority(mut self, priority: u8) -> Self {
        self.min_priority = Some(priority);
        self
    }

    pub fn max_priority(mut self, priority: u8) -> Self {
        self.max_priority = Some(priority);
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn title_contains(mut self, substring: impl Into<String>) -> Self {
        self.title_contains = Some(substring.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Validation errors for tasks and operation inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTitle,
    TitleTooLong,
    InvalidCharacters,
    InvalidPriority(u8),
    InvalidLabel(String),
    InvalidStatus(String),
    InvalidType(String),
    InvalidDepType(String),
    InvalidPrefix(String),
    EmptyId,
    EmptyAgent,
    SelfDependency(String),
    InvalidTimestamp,
    ClosedAtWithoutClosedStatus,
    CloseReasonWithoutClosedStatus,
    ClosedWithoutReason,
    AssigneeWithoutInProgress,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyTitle => write!(f, "title cannot be empty"),
            ValidationError::TitleTooLong => write!(f, "title exceeds {} characters", MAX_TITLE_LEN),
            ValidationError::InvalidCharacters => write!(f, "title contains control characters"),
            ValidationError::InvalidPriority(p) => write!(f, "priority must be 0-{}, got {}", MAX_PRIORITY, p),
            ValidationError::InvalidLabel(label) => {
                write!(
                    f,
                    "invalid label '{}': must be alphanumeric with - _ : or .",
                    label
                )
            }
            ValidationError::InvalidStatus(s) => {
                write!(f, "invalid status '{}': expected open, in_progress or closed", s)
            }
            ValidationError::InvalidType(s) => {
                write!(f, "invalid type '{}': expected task, bug, feature, epic or message", s)
            }
            ValidationError::InvalidDepType(s) => {
                write!(f, "invalid dependency type '{}': expected blocks, related or discovered-from", s)
            }
            ValidationError::InvalidPrefix(p) => {
                write!(f, "invalid id prefix '{}': use lowercase letters, digits and inner hyphens", p)
            }
            ValidationError::EmptyId => write!(f, "task id cannot be empty"),
            ValidationError::EmptyAgent => write!(f, "agent identity cannot be empty"),
            ValidationError::SelfDependency(id) => write!(f, "task {} cannot depend on itself", id),
            ValidationError::InvalidTimestamp => write!(f, "updated_at cannot be before created_at"),
            ValidationError::ClosedAtWithoutClosedStatus => {
                write!(f, "closed_at and status closed must be set together")
            }
            ValidationError::CloseReasonWithoutClosedStatus => {
                write!(f, "close_reason set but status is not closed")
            }
            ValidationError::ClosedWithoutReason => write!(f, "closed task has no close_reason"),
            ValidationError::AssigneeWithoutInProgress => {
                write!(f, "assignee set but status is not in_progress")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a title on its own (create and update share this).
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong);
    }
    if title.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

impl Task {
    /// Validate the task's fields: input rules for titles and labels plus
    /// [`Task::check_invariants`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;

        for label in &self.labels {
            if !is_valid_label(label) {
                return Err(ValidationError::InvalidLabel(label.clone()));
            }
        }

        self.check_invariants()
    }

    /// Consistency rules every stored snapshot must satisfy, whoever wrote it.
    ///
    /// Title and label rules are left out: they apply to local input, and a
    /// snapshot written elsewhere is kept as written.
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }

        if self.priority > MAX_PRIORITY {
            return Err(ValidationError::InvalidPriority(self.priority));
        }

        if self.updated_at < self.created_at {
            return Err(ValidationError::InvalidTimestamp);
        }

        // closed_at and close_reason exist exactly while closed
        if self.closed_at.is_some() != (self.status == Status::Closed) {
            return Err(ValidationError::ClosedAtWithoutClosedStatus);
        }
        if self.close_reason.is_some() && self.status != Status::Closed {
            return Err(ValidationError::CloseReasonWithoutClosedStatus);
        }
        if self.status == Status::Closed && self.close_reason.as_deref().is_none_or(str::is_empty) {
            return Err(ValidationError::ClosedWithoutReason);
        }

        if self.assignee.is_some() && self.status != Status::InProgress {
            return Err(ValidationError::AssigneeWithoutInProgress);
        }

        for dep in &self.dependencies {
            if dep.to_id == self.id {
                return Err(ValidationError::SelfDependency(self.id.clone()));
            }
        }

        Ok(())
    }

    /// Sort dependencies by `(to_id, type)` and drop duplicate pairs.
    pub fn normalize(&mut self) {
        self.dependencies
            .sort_by(|a, b| (a.to_id.as_str(), a.dep_type).cmp(&(b.to_id.as_str(), b.dep_type)));
        self.dependencies
            .dedup_by(|a, b| a.to_id == b.to_id && a.dep_type == b.dep_type);
    }

    /// Look up an outbound edge.
    pub fn dependency(&self, to_id: &str, dep_type: DepType) -> Option<&Dependency> {
        self.dependencies
            .iter()
            .find(|d| d.to_id == to_id && d.dep_type == dep_type)
    }

    /// SHA-256 (hex) of the task's JSON form.
    ///
    /// Field order is fixed and every map is ordered, so equal tasks hash
    /// equally regardless of where they came from.
    pub fn content_hash(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&json);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Whether this snapshot wins over `other` for the same id.
    ///
    /// Later `updated_at` wins; equal timestamps fall back to the larger
    /// content hash so every replica picks the same survivor.
    pub fn supersedes(&self, other: &Task) -> bool {
        match self.updated_at.cmp(&other.updated_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.content_hash() > other.content_hash(),
        }
    }
}
