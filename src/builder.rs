//! Chained construction of a [`NewTask`], created in one call.

use crate::store::Store;
use crate::types::{NewTask, Task, TaskType};
use eyre::Result;
use serde_json::Value;

/// Collects the fields of a task, then hands them to [`Store::create`].
///
/// ```ignore
/// let task = store.build("Split the claim query")
///     .priority(1)
///     .task_type(TaskType::Feature)
///     .label("index")
///     .parent(&epic.id)
///     .create()?;
/// ```
pub struct TaskBuilder<'a> {
    store: &'a mut Store,
    new: NewTask,
}

impl<'a> TaskBuilder<'a> {
    pub fn new(store: &'a mut Store, title: impl Into<String>) -> Self {
        Self {
            store,
            new: NewTask::new(title),
        }
    }

    /// 0 is the most urgent, 4 the least. Defaults to 2.
    pub fn priority(mut self, priority: u8) -> Self {
        self.new.priority = priority;
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.new.task_type = task_type;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.new.labels.insert(label.into());
        self
    }

    pub fn labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.new.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.new.description = Some(description.into());
        self
    }

    /// Make this task a child of `parent_id`, usually an epic.
    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.new.parent_id = Some(parent_id.into());
        self
    }

    pub fn external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.new.external_ref = Some(external_ref.into());
        self
    }

    /// Repeated keys keep the last value.
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.new.metadata.insert(key.into(), value);
        self
    }

    /// Validate, mint an id and insert. The task is marked dirty for the next export.
    pub fn create(self) -> Result<Task> {
        self.store.create(self.new)
    }
}

/// Adds [`StoreBuilderExt::build`] to [`Store`].
pub trait StoreBuilderExt {
    fn build(&mut self, title: impl Into<String>) -> TaskBuilder<'_>;
}

impl StoreBuilderExt for Store {
    fn build(&mut self, title: impl Into<String>) -> TaskBuilder<'_> {
        TaskBuilder::new(self, title)
    }
}
