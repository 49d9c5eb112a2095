//! Dependency engine: ready set, blocked set and dependency trees.
//!
//! Edges are not required to form a DAG and their targets are not required to
//! exist. A `blocks` edge whose target is missing counts as unresolved, so a
//! task never becomes ready because its blocker has not been imported yet.

use crate::error::StoreError;
use crate::index;
use crate::types::{DepType, Filter, Status, Task};
use eyre::{Result, eyre};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// SQL over alias `t`: the task has a `blocks` edge to a missing or unclosed task.
const HAS_UNRESOLVED_BLOCKER: &str = "EXISTS (\
     SELECT 1 FROM dependencies d LEFT JOIN tasks b ON b.id = d.to_id \
     WHERE d.from_id = t.id AND d.dep_type = 'blocks' \
     AND (b.id IS NULL OR b.status != 'closed'))";

/// Which way to walk `blocks` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From a task to the tasks it waits on.
    Down,
    /// From a task to the tasks waiting on it.
    Up,
}

/// One row of a dependency tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    /// Distance from the root (root is 0)
    pub depth: usize,
    /// IDs from the root down to and including this node
    pub path: Vec<String>,
    pub id: String,
    /// `None` when the id is not present locally
    pub task: Option<Task>,
}

/// A task held back by at least one unresolved blocker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedTask {
    pub task: Task,
    /// Blocker IDs, missing or not yet closed
    pub blocked_by: Vec<String>,
}

/// Open, unassigned tasks with no unresolved blocker, most urgent first.
pub(crate) fn ready(conn: &Connection, filter: &Filter) -> Result<Vec<Task>> {
    let condition = format!(
        "t.status = 'open' AND t.assignee IS NULL AND NOT {}",
        HAS_UNRESOLVED_BLOCKER
    );
    index::query_tasks(conn, &condition, filter)
}

/// Open or in-progress tasks with at least one unresolved blocker.
pub(crate) fn blocked(conn: &Connection) -> Result<Vec<BlockedTask>> {
    let condition = format!("t.status IN ('open', 'in_progress') AND {}", HAS_UNRESOLVED_BLOCKER);
    let tasks = index::query_tasks(conn, &condition, &Filter::new())?;

    let mut result = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut blocked_by = Vec::new();
        for dep in task.dependencies.iter().filter(|d| d.dep_type.is_blocking()) {
            let resolved = index::load_task(conn, &dep.to_id)?.is_some_and(|b| b.status == Status::Closed);
            if !resolved {
                blocked_by.push(dep.to_id.clone());
            }
        }
        result.push(BlockedTask { task, blocked_by });
    }
    Ok(result)
}

/// Breadth-first walk along `blocks` edges from `root`.
///
/// Each id appears once; traversal stops expanding at `max_depth` and at ids
/// that are not present locally. Cycles terminate because of the visited set.
pub(crate) fn dep_tree(conn: &Connection, root: &str, direction: Direction, max_depth: usize) -> Result<Vec<TreeNode>> {
    let root_task = index::load_task(conn, root)?.ok_or_else(|| eyre!(StoreError::NotFound(root.to_string())))?;

    let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
    let mut queue = VecDeque::from([TreeNode {
        depth: 0,
        path: vec![root.to_string()],
        id: root.to_string(),
        task: Some(root_task),
    }]);
    let mut nodes = Vec::new();

    while let Some(node) = queue.pop_front() {
        if node.task.is_some() && node.depth < max_depth {
            let next_ids: Vec<String> = match direction {
                Direction::Down => index::edges_from(conn, &node.id, Some(DepType::Blocks))?
                    .into_iter()
                    .map(|e| e.to_id)
                    .collect(),
                Direction::Up => index::edges_to(conn, &node.id, Some(DepType::Blocks))?
                    .into_iter()
                    .map(|e| e.from_id)
                    .collect(),
            };

            for next in next_ids {
                if !visited.insert(next.clone()) {
                    continue;
                }
                let mut path = node.path.clone();
                path.push(next.clone());
                queue.push_back(TreeNode {
                    depth: node.depth + 1,
                    path,
                    task: index::load_task(conn, &next)?,
                    id: next,
                });
            }
        }
        nodes.push(node);
    }

    log::debug!("dep tree from {} ({:?}): {} node(s)", root, direction, nodes.len());
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::index::Index;
    use crate::types::{Dependency, TaskType};
    use std::collections::{BTreeMap, BTreeSet};

    fn make_task(id: &str, priority: u8, blocked_by: &[&str]) -> Task {
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
            dependencies: blocked_by
                .iter()
                .map(|to| Dependency {
                    to_id: to.to_string(),
                    dep_type: DepType::Blocks,
                    created_at: now,
                })
                .collect(),
        }
    }

    fn setup(tasks: &[Task]) -> Index {
        let mut index = Index::open_in_memory().unwrap();
        index
            .write("test", |tx| {
                for task in tasks {
                    index::upsert_task(tx, task)?;
                }
                Ok(())
            })
            .unwrap();
        index
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_ready_excludes_missing_blocker() {
        let index = setup(&[make_task("tr-a", 2, &["tr-ghost"]), make_task("tr-b", 2, &[])]);
        let ready = ready(index.conn(), &Filter::new()).unwrap();
        assert_eq!(ids(&ready), vec!["tr-b"]);
    }

    #[test]
    fn test_ready_ignores_non_blocking_edges() {
        let mut task = make_task("tr-a", 2, &[]);
        task.dependencies.push(Dependency {
            to_id: "tr-b".to_string(),
            dep_type: DepType::Related,
            created_at: task.created_at,
        });
        let index = setup(&[task, make_task("tr-b", 2, &[])]);

        assert_eq!(ready(index.conn(), &Filter::new()).unwrap().len(), 2);
    }

    #[test]
    fn test_ready_order_and_limit() {
        let index = setup(&[
            make_task("tr-c", 3, &[]),
            make_task("tr-a", 0, &[]),
            make_task("tr-b", 1, &[]),
        ]);

        let ready = ready(index.conn(), &Filter::new().limit(2)).unwrap();
        assert_eq!(ids(&ready), vec!["tr-a", "tr-b"]);
    }

    #[test]
    fn test_blocked_reports_blockers() {
        let mut done = make_task("tr-done", 2, &[]);
        done.status = Status::Closed;
        done.closed_at = Some(done.updated_at);
        done.close_reason = Some("finished".to_string());
        let index = setup(&[
            done,
            make_task("tr-open", 2, &[]),
            make_task("tr-x", 2, &["tr-done", "tr-ghost", "tr-open"]),
        ]);

        let blocked = blocked(index.conn()).unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].task.id, "tr-x");
        assert_eq!(blocked[0].blocked_by, vec!["tr-ghost", "tr-open"]);
    }

    #[test]
    fn test_tree_down_and_up() {
        let index = setup(&[
            make_task("tr-a", 2, &["tr-b"]),
            make_task("tr-b", 2, &["tr-c"]),
            make_task("tr-c", 2, &[]),
        ]);

        let down = dep_tree(index.conn(), "tr-a", Direction::Down, 50).unwrap();
        assert_eq!(down.iter().map(|n| n.depth).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(down[2].path, vec!["tr-a", "tr-b", "tr-c"]);

        let up = dep_tree(index.conn(), "tr-c", Direction::Up, 50).unwrap();
        assert_eq!(up.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["tr-c", "tr-b", "tr-a"]);
    }

    #[test]
    fn test_tree_cycle_terminates() {
        let index = setup(&[make_task("tr-a", 2, &["tr-b"]), make_task("tr-b", 2, &["tr-a"])]);

        let tree = dep_tree(index.conn(), "tr-a", Direction::Down, 50).unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_tree_depth_cap_and_missing_nodes() {
        let index = setup(&[
            make_task("tr-a", 2, &["tr-b", "tr-ghost"]),
            make_task("tr-b", 2, &["tr-c"]),
            make_task("tr-c", 2, &[]),
        ]);

        let tree = dep_tree(index.conn(), "tr-a", Direction::Down, 1).unwrap();
        let ids: Vec<_> = tree.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["tr-a", "tr-b", "tr-ghost"]);
        assert!(tree[2].task.is_none());
    }

    #[test]
    fn test_tree_missing_root() {
        let index = setup(&[]);
        let err = dep_tree(index.conn(), "tr-none", Direction::Down, 5).unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_))));
    }
}
