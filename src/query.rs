//! Chained task queries over a [`Store`].
//!
//! `store.query().status(Status::Open).label("db").ready()` builds a
//! [`Filter`] step by step and hands it to `list`, `ready` or `count`.

use crate::store::Store;
use crate::types::{Filter, Status, Task, TaskType};
use eyre::Result;

/// A [`Filter`] under construction, bound to the store it will run against.
pub struct Query<'a> {
    store: &'a Store,
    filter: Filter,
}

impl<'a> Query<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            filter: Filter::new(),
        }
    }

    pub fn status(mut self, status: Status) -> Self {
        self.filter = self.filter.status(status);
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.filter = self.filter.task_type(task_type);
        self
    }

    /// Require a label. Repeated calls narrow the match: every label must be present.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.filter = self.filter.label(label);
        self
    }

    pub fn labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filter = self.filter.labels(labels);
        self
    }

    /// Priority number at least `priority`; 0 is the most urgent.
    pub fn min_priority(mut self, priority: u8) -> Self {
        self.filter = self.filter.min_priority(priority);
        self
    }

    /// Priority number at most `priority`.
    pub fn max_priority(mut self, priority: u8) -> Self {
        self.filter = self.filter.max_priority(priority);
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.filter = self.filter.assignee(assignee);
        self
    }

    /// Children of an epic.
    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.filter = self.filter.parent_id(parent_id);
        self
    }

    /// Title contains `substring`, ignoring case.
    pub fn title_contains(mut self, substring: impl Into<String>) -> Self {
        self.filter = self.filter.title_contains(substring);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.filter = self.filter.limit(limit);
        self
    }

    /// Rows to skip before `limit` applies.
    pub fn offset(mut self, offset: usize) -> Self {
        self.filter = self.filter.offset(offset);
        self
    }

    /// Matching tasks, most urgent first.
    pub fn execute(self) -> Result<Vec<Task>> {
        self.store.list(&self.filter)
    }

    /// Only the matching tasks that are ready to claim.
    pub fn ready(self) -> Result<Vec<Task>> {
        self.store.ready(&self.filter)
    }

    /// Number of matches; `limit` and `offset` are ignored.
    pub fn count(self) -> Result<usize> {
        self.store.count(&self.filter)
    }
}

/// Adds [`StoreQueryExt::query`] to [`Store`].
pub trait StoreQueryExt {
    fn query(&self) -> Query<'_>;
}

impl StoreQueryExt for Store {
    fn query(&self) -> Query<'_> {
        Query::new(self)
    }
}
