// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for the signed-in user: dashboard, profile, departments.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::department::directory;
use crate::models::{DepartmentEntry, Profile, ProfileUpdate};
use crate::services::ProfileState;
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// API routes (require a session).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route("/api/profile", get(get_profile).put(save_profile))
        .route("/api/profile/refresh", post(refresh_profile))
        .route("/api/departments", get(get_departments))
}

// ─── Dashboard ───────────────────────────────────────────────

/// Dashboard summary of the current user.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MeResponse {
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    /// Avatar letter
    pub initial: String,
    pub department_id: Option<String>,
    pub profile_loading: bool,
}

async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<MeResponse> {
    let ProfileState { profile, loading } = state.profiles.state();
    let profile = profile.filter(|p| p.id == user.user_id);

    Json(MeResponse {
        initial: profile
            .as_ref()
            .map_or('U', Profile::initial)
            .to_string(),
        email: profile
            .as_ref()
            .and_then(|p| p.email.clone())
            .or(user.email),
        full_name: profile.as_ref().map(|p| p.full_name.clone()),
        department_id: profile.and_then(|p| p.department_id),
        user_id: user.user_id,
        profile_loading: loading,
    })
}

// ─── Profile ─────────────────────────────────────────────────

async fn get_profile(State(state): State<Arc<AppState>>) -> Json<ProfileState> {
    Json(state.profiles.state())
}

async fn refresh_profile(State(state): State<Arc<AppState>>) -> Json<ProfileState> {
    state.profiles.refresh().await;
    Json(state.profiles.state())
}

/// Save the profile form.
async fn save_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ProfileState>> {
    tracing::info!(user_id = %user.user_id, "Profile save requested");
    state.profiles.save(update).await?;
    Ok(Json(state.profiles.state()))
}

// ─── Departments ─────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DepartmentsResponse {
    /// Department of the current user, if set
    pub own: Option<String>,
    pub departments: Vec<DepartmentEntry>,
}

/// Department directory with access relative to the user's own department.
async fn get_departments(State(state): State<Arc<AppState>>) -> Json<DepartmentsResponse> {
    let own = state.profiles.profile().and_then(|p| p.department_id);
    Json(DepartmentsResponse {
        departments: directory(own.as_deref()),
        own,
    })
}
