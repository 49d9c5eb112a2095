//! Claim coordinator: exclusive assignment of open tasks.
//!
//! `claim` is a compare-and-set on `(status, assignee)` executed inside an
//! IMMEDIATE transaction, so two agents racing for the same task from
//! different processes get exactly one winner.

use crate::clock;
use crate::error::{self, StoreError};
use crate::index::{self, Index};
use crate::types::{Status, Task, ValidationError};
use eyre::{Result, eyre};
use rusqlite::{Connection, params};

fn load_existing(conn: &Connection, id: &str) -> Result<Task> {
    index::load_task(conn, id)?.ok_or_else(|| eyre!(StoreError::NotFound(id.to_string())))
}

/// Try to take `id` for `agent`.
///
/// Returns `Ok(false)` when the task exists but is not claimable: already in
/// progress (even by the same agent), closed, or taken by a concurrent claim.
pub(crate) fn claim(index: &mut Index, id: &str, agent: &str) -> Result<bool> {
    if agent.trim().is_empty() {
        return Err(eyre!(StoreError::Validation(ValidationError::EmptyAgent)));
    }

    index.write("claim", |tx| {
        let task = load_existing(tx, id)?;
        let updated_at = clock::advance(task.updated_at);

        let changed = tx
            .execute(
                "UPDATE tasks SET status = 'in_progress', assignee = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND status = 'open' AND assignee IS NULL",
                params![agent, clock::to_sql(&updated_at), id],
            )
            .map_err(error::sqlite)?;

        if changed == 0 {
            log::debug!("claim of {} by {} refused: status {}", id, agent, task.status);
            return Ok(false);
        }

        index::mark_dirty(tx, id)?;
        log::info!("{} claimed by {}", id, agent);
        Ok(true)
    })
}

/// Return `id` to the open pool. No ownership check.
pub(crate) fn release(index: &mut Index, id: &str) -> Result<Task> {
    index.write("release", |tx| {
        let mut task = load_existing(tx, id)?;
        if task.status == Status::Closed {
            return Err(eyre!(StoreError::InvalidTransition {
                from: Status::Closed,
                to: Status::Open,
            }));
        }

        task.status = Status::Open;
        task.assignee = None;
        task.updated_at = clock::advance(task.updated_at);

        index::upsert_task(tx, &task)?;
        index::mark_dirty(tx, id)?;
        Ok(task)
    })
}

/// Close `id` with a non-empty reason. Closed is terminal.
pub(crate) fn close(index: &mut Index, id: &str, reason: &str) -> Result<Task> {
    if reason.trim().is_empty() {
        return Err(eyre!(StoreError::MissingCloseReason));
    }

    index.write("close", |tx| {
        let mut task = load_existing(tx, id)?;
        if !task.status.can_transition_to(&Status::Closed) {
            return Err(eyre!(StoreError::InvalidTransition {
                from: task.status,
                to: Status::Closed,
            }));
        }

        let now = clock::advance(task.updated_at);
        task.status = Status::Closed;
        task.assignee = None;
        task.close_reason = Some(reason.to_string());
        task.closed_at = Some(now);
        task.updated_at = now;

        index::upsert_task(tx, &task)?;
        index::mark_dirty(tx, id)?;
        Ok(task)
    })
}
