// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Magic-link authentication routes.

use axum::{extract::State, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::Result;
use crate::models::department::validate_department;
use crate::models::profile::validate_required_name;
use crate::models::User;
use crate::services::{History, MemoryHistory};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/magic-link", post(send_magic_link))
        .route("/auth/callback", post(auth_callback))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(get_session))
}

// ─── Magic Link ──────────────────────────────────────────────

/// Login form.
#[derive(Debug, Deserialize, Validate)]
pub struct MagicLinkRequest {
    #[validate(custom(function = "validate_required_name"))]
    pub full_name: String,
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[validate(custom(function = "validate_department"))]
    pub department: String,
}

impl MagicLinkRequest {
    fn normalized(self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            department: self.department.trim().to_string(),
        }
    }
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MagicLinkResponse {
    pub sent: bool,
    pub email: String,
}

/// Email a sign-in link; the name and department seed the profile.
async fn send_magic_link(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MagicLinkRequest>,
) -> Result<Json<MagicLinkResponse>> {
    let request = request.normalized();
    request.validate()?;

    let metadata = json!({
        "full_name": request.full_name,
        "department_id": request.department,
    });
    state
        .auth
        .sign_in_with_magic_link(&request.email, metadata, &state.config.frontend_url)
        .await?;

    Ok(Json(MagicLinkResponse {
        sent: true,
        email: request.email,
    }))
}

// ─── Callback ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CallbackRequest {
    /// Full URL the magic link redirected to, fragment included
    pub url: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CallbackResponse {
    /// URL to show, without auth parameters
    pub url: String,
    pub authenticated: bool,
}

/// Complete sign-in from a magic-link redirect URL.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>> {
    let history = MemoryHistory::parse(&request.url)?;
    let session = state.sessions.bootstrap(&history).await;

    Ok(Json(CallbackResponse {
        url: history.location().to_string(),
        authenticated: session.is_some(),
    }))
}

// ─── Session ─────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub loading: bool,
    #[cfg_attr(feature = "binding-generation", ts(type = "unknown"))]
    pub user: Option<User>,
}

async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let current = state.sessions.state();
    Json(SessionResponse {
        authenticated: current.is_authenticated(),
        loading: current.loading,
        user: current.user().cloned(),
    })
}

/// Sign out of the provider and drop the local session.
async fn logout(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    state.sessions.sign_out().await?;
    Ok(Json(json!({ "success": true })))
}
