// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task repository over the `tasks` table.

use crate::backend::{decode_row, tables, Filter, Order, RowStore};
use crate::error::Result;
use crate::models::{Task, TaskStatus};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct TaskRepository {
    rows: Arc<dyn RowStore>,
}

impl TaskRepository {
    pub fn new(rows: Arc<dyn RowStore>) -> Self {
        Self { rows }
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Result<Vec<Task>> {
        let rows = self
            .rows
            .select_many(tables::TASKS, None, Some(&Order::desc("created_at")))
            .await?;

        rows.into_iter()
            .map(|row| decode_row(tables::TASKS, row))
            .collect()
    }

    /// Move task `id` to `status`, stamping `updated_at` with the current time.
    pub async fn set_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.set_status_at(id, status, Utc::now()).await
    }

    pub async fn set_status_at(
        &self,
        id: &str,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let patch = json!({
            "status": status,
            "updated_at": format_utc_rfc3339(now),
        });

        self.rows
            .update(tables::TASKS, patch, &Filter::eq("id", id))
            .await?;
        tracing::debug!(task_id = id, status = %status, "Task status updated");
        Ok(())
    }
}
