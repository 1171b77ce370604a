// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task board routes.

use crate::error::Result;
use crate::models::{Task, TaskStatus};
use crate::services::{DropPayload, MoveOutcome};
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/board", get(get_board))
        .route("/api/board/reload", post(reload_board))
        .route("/api/board/move", post(move_task))
}

#[derive(Deserialize)]
struct BoardQuery {
    /// Free-text search over title and description
    #[serde(default)]
    q: String,
}

/// One board column.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ColumnResponse {
    pub status: TaskStatus,
    pub label: String,
    pub tasks: Vec<Task>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct BoardResponse {
    pub query: String,
    pub total: usize,
    pub columns: Vec<ColumnResponse>,
}

fn board_response(state: &AppState, query: String) -> BoardResponse {
    let columns: Vec<ColumnResponse> = state
        .board
        .columns(&query)
        .into_iter()
        .map(|(status, tasks)| ColumnResponse {
            status,
            label: status.label().to_string(),
            tasks,
        })
        .collect();

    BoardResponse {
        total: columns.iter().map(|c| c.tasks.len()).sum(),
        query,
        columns,
    }
}

/// Board columns, loading the board first if it never was.
async fn get_board(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BoardQuery>,
) -> Result<Json<BoardResponse>> {
    state.board.ensure_loaded().await?;
    Ok(Json(board_response(&state, params.q)))
}

async fn reload_board(State(state): State<Arc<AppState>>) -> Result<Json<BoardResponse>> {
    state.board.load().await?;
    Ok(Json(board_response(&state, String::new())))
}

#[derive(Serialize)]
pub struct MoveResponse {
    #[serde(flatten)]
    pub outcome: MoveOutcome,
    pub board: BoardResponse,
}

/// Apply a drag-and-drop drop.
async fn move_task(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DropPayload>,
) -> Result<Json<MoveResponse>> {
    let outcome = state.board.drop_task(payload).await?;
    Ok(Json(MoveResponse {
        outcome,
        board: board_response(&state, String::new()),
    }))
}
