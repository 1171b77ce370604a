// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Board controller tests.
//!
//! These tests verify that:
//! 1. Columns are a disjoint cover of the loaded task list
//! 2. Moves are optimistic and reconcile by reloading on failure
//! 3. Same-column drops change nothing and issue no call
//! 4. Superseded loads are discarded

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use taski::backend::memory::Operation;
use taski::backend::{tables, Filter, MemoryRowStore, Order, Row, RowStore};
use taski::error::{AppError, Result};
use taski::models::TaskStatus;
use taski::services::board::partition;
use taski::services::{BoardController, DropPayload, LoadOutcome, MoveOutcome, TaskRepository};
use tokio::sync::{oneshot, Mutex, Notify};

mod common;

use common::{seed_tasks, task_row};

fn board_over(rows: Arc<dyn RowStore>) -> BoardController {
    BoardController::new(TaskRepository::new(rows))
}

fn ids(board: &BoardController, status: TaskStatus, query: &str) -> Vec<String> {
    board.columns(query)[&status]
        .iter()
        .map(|t| t.id.clone())
        .collect()
}

fn two_tasks() -> Arc<MemoryRowStore> {
    let rows = Arc::new(MemoryRowStore::new());
    seed_tasks(
        &rows,
        vec![
            task_row("1", "Write launch notes", "todo", "2025-02-01T00:00:00Z"),
            task_row("2", "Ship firmware", "completed", "2025-01-01T00:00:00Z"),
        ],
    );
    rows
}

#[tokio::test]
async fn test_fresh_load_partitions_by_status() {
    let board = board_over(two_tasks());
    assert_eq!(board.load().await.unwrap(), LoadOutcome::Applied);

    assert_eq!(ids(&board, TaskStatus::Todo, ""), vec!["1"]);
    assert!(ids(&board, TaskStatus::InProgress, "").is_empty());
    assert_eq!(ids(&board, TaskStatus::Completed, ""), vec!["2"]);
}

#[tokio::test]
async fn test_columns_are_disjoint_cover() {
    let rows = Arc::new(MemoryRowStore::new());
    seed_tasks(
        &rows,
        vec![
            task_row("a", "One", "todo", "2025-01-05T00:00:00Z"),
            task_row("b", "Two", "in_progress", "2025-01-04T00:00:00Z"),
            task_row("c", "Three", "completed", "2025-01-03T00:00:00Z"),
            task_row("d", "Four", "todo", "2025-01-02T00:00:00Z"),
            task_row("e", "Five", "in_progress", "2025-01-01T00:00:00Z"),
        ],
    );
    let board = board_over(rows);
    board.load().await.unwrap();

    let columns = board.columns("");
    let mut seen = HashSet::new();
    for (status, tasks) in &columns {
        for task in tasks {
            assert_eq!(task.status, *status);
            assert!(seen.insert(task.id.clone()), "task {} in two columns", task.id);
        }
    }
    let all: HashSet<_> = board.tasks().into_iter().map(|t| t.id).collect();
    assert_eq!(seen, all);
}

#[tokio::test]
async fn test_search_is_idempotent() {
    let rows = Arc::new(MemoryRowStore::new());
    seed_tasks(
        &rows,
        vec![
            task_row("1", "Fix login redirect", "todo", "2025-01-03T00:00:00Z"),
            task_row("2", "Login copy", "completed", "2025-01-02T00:00:00Z"),
            task_row("3", "Printer calibration", "todo", "2025-01-01T00:00:00Z"),
        ],
    );
    let board = board_over(rows);
    board.load().await.unwrap();

    let once = board.columns("LOGIN");
    let filtered: Vec<_> = once.values().flatten().cloned().collect();
    let twice = partition(&filtered, "LOGIN");

    assert_eq!(once, twice);
    assert_eq!(filtered.len(), 2);
}

#[tokio::test]
async fn test_move_success_places_task_in_target_column() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();

    let outcome = board
        .move_task("1", TaskStatus::Todo, TaskStatus::InProgress)
        .await;

    assert_eq!(outcome, MoveOutcome::Moved);
    assert_eq!(ids(&board, TaskStatus::InProgress, ""), vec!["1"]);
    assert!(ids(&board, TaskStatus::Todo, "").is_empty());
    assert_eq!(rows.rows(tables::TASKS)[0]["status"], "in_progress");
}

#[tokio::test]
async fn test_same_column_drop_is_noop() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();
    let before = board.tasks();
    let calls_before = rows.calls().len();

    let outcome = board.move_task("1", TaskStatus::Todo, TaskStatus::Todo).await;

    assert_eq!(outcome, MoveOutcome::Unchanged);
    assert_eq!(board.tasks(), before);
    assert_eq!(rows.calls().len(), calls_before);
}

#[tokio::test]
async fn test_rejected_move_reconciles_to_server_status() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();

    rows.fail_next(
        Operation::Update,
        AppError::Database("permission denied for table tasks".into()),
    );
    let outcome = board
        .move_task("2", TaskStatus::Completed, TaskStatus::Todo)
        .await;

    assert!(matches!(outcome, MoveOutcome::Failed { .. }));
    assert_eq!(board.status_of("2"), Some(TaskStatus::Completed));
    assert_eq!(rows.calls_of(Operation::SelectMany).len(), 2);
}

#[tokio::test]
async fn test_rejected_move_picks_up_concurrent_server_change() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();

    // Someone else moved the task meanwhile; the reload shows their value.
    seed_tasks(
        &rows,
        vec![
            task_row("1", "Write launch notes", "in_progress", "2025-02-01T00:00:00Z"),
            task_row("2", "Ship firmware", "completed", "2025-01-01T00:00:00Z"),
        ],
    );
    rows.fail_next(Operation::Update, AppError::Network("timed out".into()));

    board
        .move_task("1", TaskStatus::Todo, TaskStatus::Completed)
        .await;

    assert_eq!(board.status_of("1"), Some(TaskStatus::InProgress));
}

#[tokio::test]
async fn test_failed_reload_after_rejected_move_keeps_board() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();

    rows.fail_next(Operation::Update, AppError::Network("offline".into()));
    rows.fail_next(Operation::SelectMany, AppError::Network("offline".into()));

    let outcome = board
        .move_task("1", TaskStatus::Todo, TaskStatus::Completed)
        .await;

    assert!(matches!(outcome, MoveOutcome::Failed { .. }));
    assert_eq!(board.tasks().len(), 2);
}

#[tokio::test]
async fn test_drop_without_task_id_is_ignored() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();

    let outcome = board
        .drop_task(DropPayload {
            task_id: None,
            from_status: Some("todo".into()),
            to_status: "completed".into(),
        })
        .await
        .unwrap();

    assert_eq!(outcome, MoveOutcome::Ignored);
    assert!(rows.calls_of(Operation::Update).is_empty());
}

#[tokio::test]
async fn test_drop_with_unknown_status_is_rejected() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();

    let err = board
        .drop_task(DropPayload {
            task_id: Some("1".into()),
            from_status: None,
            to_status: "archived".into(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(board.status_of("1"), Some(TaskStatus::Todo));
    assert!(rows.calls_of(Operation::Update).is_empty());
}

#[tokio::test]
async fn test_drop_uses_board_status_when_origin_missing() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();

    let outcome = board
        .drop_task(DropPayload {
            task_id: Some("2".into()),
            from_status: None,
            to_status: "completed".into(),
        })
        .await
        .unwrap();

    assert_eq!(outcome, MoveOutcome::Unchanged);
}

// ─── Load ordering ───────────────────────────────────────────

/// Row store whose first `select_many` takes its snapshot, then waits for a gate.
struct GatedRows {
    inner: MemoryRowStore,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    entered: Notify,
}

#[async_trait]
impl RowStore for GatedRows {
    async fn select_one(&self, table: &str, filter: &Filter) -> Result<Row> {
        self.inner.select_one(table, filter).await
    }

    async fn select_many(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<Vec<Row>> {
        let rows = self.inner.select_many(table, filter, order).await;
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _ = gate.await;
        }
        rows
    }

    async fn insert(&self, table: &str, row: Row) -> Result<()> {
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: &str, patch: Row, filter: &Filter) -> Result<()> {
        self.inner.update(table, patch, filter).await
    }
}

#[tokio::test]
async fn test_superseded_load_is_discarded() {
    let (release, gate) = oneshot::channel();
    let rows = Arc::new(GatedRows {
        inner: MemoryRowStore::new(),
        gate: Mutex::new(Some(gate)),
        entered: Notify::new(),
    });
    seed_tasks(
        &rows.inner,
        vec![task_row("1", "Old", "todo", "2025-01-01T00:00:00Z")],
    );

    let board = Arc::new(board_over(rows.clone()));
    let slow = tokio::spawn({
        let board = board.clone();
        async move { board.load().await }
    });
    rows.entered.notified().await;

    seed_tasks(
        &rows.inner,
        vec![
            task_row("1", "Old", "completed", "2025-01-01T00:00:00Z"),
            task_row("2", "New", "todo", "2025-01-02T00:00:00Z"),
        ],
    );
    assert_eq!(board.load().await.unwrap(), LoadOutcome::Applied);

    release.send(()).unwrap();
    assert_eq!(slow.await.unwrap().unwrap(), LoadOutcome::Superseded);

    assert_eq!(board.tasks().len(), 2);
    assert_eq!(board.status_of("1"), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_ensure_loaded_loads_once() {
    let rows = two_tasks();
    let board = board_over(rows.clone());

    board.ensure_loaded().await.unwrap();
    board.ensure_loaded().await.unwrap();

    assert_eq!(rows.calls_of(Operation::SelectMany).len(), 1);
    assert_eq!(board.tasks().len(), 2);
}

#[tokio::test]
async fn test_load_orders_newest_first() {
    let rows = two_tasks();
    let board = board_over(rows.clone());
    board.load().await.unwrap();

    let order: Vec<_> = board.tasks().into_iter().map(|t| t.id).collect();
    assert_eq!(order, vec!["1", "2"]);

    let call = &rows.calls_of(Operation::SelectMany)[0];
    assert_eq!(call.table, tables::TASKS);
}
