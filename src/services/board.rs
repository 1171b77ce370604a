// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Kanban board: in-memory task list, status columns and drag-and-drop moves.
//!
//! Moves are optimistic. The in-memory task changes status at once; when
//! the server rejects the write the whole board is reloaded instead of
//! rolling back the single field.

use crate::error::{AppError, Result};
use crate::models::{Task, TaskStatus};
use crate::services::tasks::TaskRepository;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Tasks grouped by status. All three statuses are always present.
pub type Columns = BTreeMap<TaskStatus, Vec<Task>>;

/// Result of applying a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer load was issued while this one was in flight
    Superseded,
}

/// Result of a drag-and-drop move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum MoveOutcome {
    /// Dropped on the column it came from
    Unchanged,
    Moved,
    /// Server rejected the write; the board was reloaded
    Failed { reason: String },
    /// Drop carried no task
    Ignored,
}

/// Drop event as received from the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DropPayload {
    #[serde(default)]
    pub task_id: Option<String>,
    /// Status of the task when the drag started
    #[serde(default)]
    pub from_status: Option<String>,
    pub to_status: String,
}

pub struct BoardController {
    repo: TaskRepository,
    tasks: RwLock<Vec<Task>>,
    /// Id of the latest load issued
    latest_load: AtomicU64,
    /// Set once a load has been applied
    loaded: AtomicBool,
}

impl BoardController {
    pub fn new(repo: TaskRepository) -> Self {
        Self {
            repo,
            tasks: RwLock::new(Vec::new()),
            latest_load: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
        }
    }

    /// Replace the task list with the server's.
    pub async fn load(&self) -> Result<LoadOutcome> {
        let request_id = self.latest_load.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = self.repo.list().await?;

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if self.latest_load.load(Ordering::SeqCst) != request_id {
            tracing::debug!(request_id, "Discarding superseded board load");
            return Ok(LoadOutcome::Superseded);
        }
        tracing::debug!(request_id, count = fetched.len(), "Board loaded");
        *tasks = fetched;
        self.loaded.store(true, Ordering::SeqCst);
        Ok(LoadOutcome::Applied)
    }

    /// Load unless a load has already been applied.
    pub async fn ensure_loaded(&self) -> Result<()> {
        if !self.loaded.load(Ordering::SeqCst) {
            self.load().await?;
        }
        Ok(())
    }

    /// Snapshot of the in-memory task list.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// In-memory status of task `id`.
    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status)
    }

    /// Current columns, filtered by `query`.
    pub fn columns(&self, query: &str) -> Columns {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        partition(&tasks, query)
    }

    /// Move task `id` from `from` (its status when the drag started) to `to`.
    pub async fn move_task(&self, id: &str, from: TaskStatus, to: TaskStatus) -> MoveOutcome {
        if from == to {
            return MoveOutcome::Unchanged;
        }

        {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                task.status = to;
            }
        }

        match self.repo.set_status(id, to).await {
            Ok(()) => {
                tracing::info!(task_id = id, %from, %to, "Task moved");
                MoveOutcome::Moved
            }
            Err(e) => {
                tracing::warn!(task_id = id, %to, error = %e, "Move rejected, reloading board");
                if let Err(reload) = self.load().await {
                    tracing::error!(error = %reload, "Board reload failed");
                }
                MoveOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Apply a drop event from the client.
    ///
    /// A drop without a task id does nothing; unknown status strings are
    /// rejected.
    pub async fn drop_task(&self, payload: DropPayload) -> Result<MoveOutcome> {
        let Some(id) = payload.task_id.filter(|id| !id.trim().is_empty()) else {
            return Ok(MoveOutcome::Ignored);
        };

        let to = parse_status(&payload.to_status)?;
        let from = match payload.from_status.as_deref() {
            Some(from) => parse_status(from)?,
            None => self
                .status_of(&id)
                .ok_or_else(|| AppError::NotFound(format!("Task {} not on board", id)))?,
        };

        Ok(self.move_task(&id, from, to).await)
    }
}

fn parse_status(value: &str) -> Result<TaskStatus> {
    value
        .parse()
        .map_err(|e: crate::models::UnknownStatus| AppError::BadRequest(e.to_string()))
}

/// Split `tasks` into status columns, keeping their order.
///
/// A non-blank `query` keeps only tasks whose title or description contains
/// it, ignoring case.
pub fn partition(tasks: &[Task], query: &str) -> Columns {
    let needle = query.trim().to_lowercase();
    let mut columns: Columns = TaskStatus::ALL.into_iter().map(|s| (s, Vec::new())).collect();

    for task in tasks
        .iter()
        .filter(|t| needle.is_empty() || t.matches(&needle))
    {
        columns.entry(task.status).or_default().push(task.clone());
    }

    columns
}
