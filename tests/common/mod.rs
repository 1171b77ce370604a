// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use taski::backend::{tables, MemoryAuth, MemoryRowStore};
use taski::config::Config;
use taski::models::{Session, User};
use taski::routes::create_router;
use taski::services::MemoryHistory;
use taski::AppState;

/// App wired to the in-memory backend, with handles on both halves.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub auth: Arc<MemoryAuth>,
    pub rows: Arc<MemoryRowStore>,
}

/// Create a test app with offline dependencies and running listeners.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    let auth = Arc::new(MemoryAuth::new());
    let rows = Arc::new(MemoryRowStore::new());
    let state = Arc::new(AppState::new(
        Config::default(),
        auth.clone(),
        rows.clone(),
    ));
    state.start();

    TestApp {
        router: create_router(state.clone()),
        state,
        auth,
        rows,
    }
}

#[allow(dead_code)]
pub fn test_user(id: &str, full_name: &str, department: &str) -> User {
    serde_json::from_value(json!({
        "id": id,
        "email": format!("{}@example.com", id),
        "user_metadata": { "full_name": full_name, "department_id": department }
    }))
    .unwrap()
}

#[allow(dead_code)]
pub fn test_session(user: User) -> Session {
    Session {
        access_token: format!("token-{}", user.id),
        refresh_token: "refresh".to_string(),
        token_type: "bearer".to_string(),
        expires_at: None,
        user,
    }
}

/// Magic-link redirect URL carrying `access_token`.
#[allow(dead_code)]
pub fn callback_url(access_token: &str) -> String {
    format!(
        "http://localhost:5173/dashboard#access_token={}&expires_in=3600&refresh_token=r1&token_type=bearer&type=magiclink",
        access_token
    )
}

/// Sign `user` in through the magic-link callback path.
#[allow(dead_code)]
pub async fn sign_in(app: &TestApp, user: User) {
    let token = format!("token-{}", user.id);
    app.auth.register_token(&token, user);
    let history = MemoryHistory::parse(&callback_url(&token)).unwrap();
    app.state.sessions.bootstrap(&history).await.unwrap();
}

/// Task row as stored by the backend.
#[allow(dead_code)]
pub fn task_row(id: &str, title: &str, status: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "description": null,
        "status": status,
        "priority": "medium",
        "assignee": null,
        "created_at": created_at,
        "updated_at": created_at,
    })
}

/// Seed the `tasks` table.
#[allow(dead_code)]
pub fn seed_tasks(rows: &MemoryRowStore, tasks: Vec<Value>) {
    rows.seed(tables::TASKS, tasks);
}

/// Poll `condition` until it holds or a second has passed.
#[allow(dead_code)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[allow(dead_code)]
pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[allow(dead_code)]
pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
