// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Supabase client for magic-link auth (GoTrue) and rows (PostgREST).
//!
//! Handles:
//! - Magic-link requests and callback completion
//! - Session persistence to a local JSON file
//! - Token refresh when the access token is about to expire
//! - PostgREST error codes (not found, duplicate key)

use crate::backend::{
    AuthEvent, AuthEventKind, AuthProvider, Filter, MagicLinkCallback, Order, Row, RowStore,
    AUTH_EVENT_CAPACITY,
};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{Session, User};
use crate::time_utils::{expiry_from, unix_now};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderValue, ACCEPT};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// PostgREST: single-object request matched zero (or many) rows.
const PGRST_NO_ROWS: &str = "PGRST116";

/// Postgres unique_violation.
const PG_UNIQUE_VIOLATION: &str = "23505";

/// Supabase client. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: Arc<RwLock<Option<Session>>>,
    /// Held while a refresh is in flight; one refresh token is spent once
    refresh_lock: Arc<Mutex<()>>,
    events: broadcast::Sender<AuthEvent>,
    session_file: PathBuf,
}

impl SupabaseClient {
    /// Create a client; every request is bounded by `config.request_timeout`.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client init failed: {}", e)))?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            http,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            session: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
            events,
            session_file: config.session_file.clone(),
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        let _ = self.events.send(AuthEvent { kind, session });
    }

    // ─── Session Storage ─────────────────────────────────────────

    /// Replace the in-memory session and mirror it to the session file.
    async fn store_session(&self, session: Option<Session>) {
        *self.session.write().await = session.clone();

        let result = match &session {
            Some(session) => self.persist(session).await,
            None => match tokio::fs::remove_file(&self.session_file).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        if let Err(e) = result {
            tracing::warn!(
                path = %self.session_file.display(),
                error = %e,
                "Failed to update persisted session"
            );
        }
    }

    async fn persist(&self, session: &Session) -> std::io::Result<()> {
        if let Some(parent) = self.session_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&self.session_file, bytes).await
    }

    async fn load_persisted(&self) -> Option<Session> {
        let bytes = match tokio::fs::read(&self.session_file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted session");
                return None;
            }
        };

        match serde_json::from_slice::<Session>(&bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable persisted session");
                None
            }
        }
    }

    // ─── GoTrue ──────────────────────────────────────────────────

    /// Fetch the user an access token belongs to.
    pub async fn get_user(&self, access_token: &str) -> Result<User> {
        let response = self
            .http
            .get(self.auth_url("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(network_error)?;

        check_auth_json(response).await
    }

    /// Exchange a refresh token for a new session.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(network_error)?;

        let token: TokenResponse = check_auth_json(response).await?;
        Ok(token.into_session(unix_now()))
    }

    // ─── PostgREST ───────────────────────────────────────────────

    /// Bearer token for row requests: the user's access token, else the anon key.
    async fn row_bearer(&self) -> String {
        match self.current_session().await {
            Ok(Some(session)) => session.access_token,
            Ok(None) => self.anon_key.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "Session unavailable, querying anonymously");
                self.anon_key.clone()
            }
        }
    }

    async fn rest_request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        let bearer = self.row_bearer().await;
        self.http
            .request(method, self.rest_url(table))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }
}

fn filter_query(filter: &Filter) -> (String, String) {
    (filter.column.clone(), format!("eq.{}", filter.value))
}

fn order_query(order: &Order) -> (String, String) {
    let direction = if order.descending { "desc" } else { "asc" };
    ("order".to_string(), format!("{}.{}", order.column, direction))
}

fn network_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Network(format!("Request timed out: {}", e))
    } else {
        AppError::Network(e.to_string())
    }
}

/// GoTrue error body (fields vary between versions).
#[derive(Debug, Default, Deserialize)]
struct GoTrueError {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl GoTrueError {
    fn into_message(self) -> Option<String> {
        self.msg
            .or(self.message)
            .or(self.error_description)
            .or(self.error)
    }
}

/// PostgREST error body.
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

/// Map a non-success GoTrue response to an error.
async fn auth_error(response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GoTrueError>(&body)
        .ok()
        .and_then(GoTrueError::into_message)
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body));

    if status.as_u16() == 429 {
        tracing::warn!("Auth rate limit hit (429)");
    }
    if status.is_server_error() {
        return AppError::Network(message);
    }
    AppError::Provider(message)
}

async fn check_auth(response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(auth_error(response).await)
}

async fn check_auth_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(auth_error(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Provider(format!("JSON parse error: {}", e)))
}

/// Map a non-success PostgREST response to an error.
async fn rest_error(table: &str, response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<PostgrestError>(&body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body));

    match (status.as_u16(), parsed.code.as_deref()) {
        (_, Some(PGRST_NO_ROWS)) | (404, _) => {
            AppError::NotFound(format!("{}: {}", table, message))
        }
        (_, Some(PG_UNIQUE_VIOLATION)) | (409, _) => AppError::Constraint(message),
        (401, _) | (403, _) => AppError::Unauthorized,
        (s, _) if s >= 500 => AppError::Network(message),
        _ => AppError::Database(message),
    }
}

async fn check_rest(table: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(rest_error(table, response).await)
}

/// Session returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now_secs: i64) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at: self
                .expires_at
                .or_else(|| expiry_from(now_secs, self.expires_in)),
            user: self.user,
        }
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn sign_in_with_magic_link(
        &self,
        email: &str,
        metadata: Value,
        redirect_url: &str,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.auth_url("otp"))
            .query(&[("redirect_to", redirect_url)])
            .header("apikey", &self.anon_key)
            .json(&json!({
                "email": email,
                "data": metadata,
                "create_user": true,
            }))
            .send()
            .await
            .map_err(network_error)?;

        check_auth(response).await?;
        tracing::info!("Magic link sent");
        Ok(())
    }

    async fn complete_magic_link(&self, callback: &MagicLinkCallback) -> Result<Session> {
        let access_token = callback
            .access_token
            .clone()
            .ok_or_else(|| AppError::Provider("Callback carries no access token".to_string()))?;

        let user = self.get_user(&access_token).await?;
        let now = unix_now();
        let session = Session {
            access_token,
            refresh_token: callback.refresh_token.clone().unwrap_or_default(),
            token_type: callback
                .token_type
                .clone()
                .unwrap_or_else(|| "bearer".to_string()),
            expires_at: callback.expiry(now),
            user,
        };

        self.store_session(Some(session.clone())).await;
        let kind = if callback.is_recovery() {
            AuthEventKind::PasswordRecovery
        } else {
            AuthEventKind::SignedIn
        };
        tracing::info!(user_id = %session.user.id, ?kind, "Magic link completed");
        self.emit(kind, Some(session.clone()));

        Ok(session)
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        let cached = self.session.read().await.clone();
        let session = match cached {
            Some(session) => session,
            None => match self.load_persisted().await {
                Some(session) => {
                    tracing::debug!(user_id = %session.user.id, "Restored persisted session");
                    *self.session.write().await = Some(session.clone());
                    session
                }
                None => return Ok(None),
            },
        };

        if !session.expires_within(Utc::now(), TOKEN_REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed or signed out while we waited.
        let session = match self.session.read().await.clone() {
            Some(session) => session,
            None => return Ok(None),
        };
        if !session.expires_within(Utc::now(), TOKEN_REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }

        if session.refresh_token.is_empty() {
            tracing::info!("Session expired and cannot be refreshed");
            self.store_session(None).await;
            self.emit(AuthEventKind::SignedOut, None);
            return Ok(None);
        }

        match self.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => {
                tracing::debug!(user_id = %refreshed.user.id, "Access token refreshed");
                self.store_session(Some(refreshed.clone())).await;
                self.emit(AuthEventKind::TokenRefreshed, Some(refreshed.clone()));
                Ok(Some(refreshed))
            }
            // Keep the stored session; the next call tries again.
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                let current = self.session.read().await.clone();
                match current {
                    Some(current) if current.refresh_token != session.refresh_token => {
                        tracing::debug!(
                            error = %e,
                            "Stale refresh token rejected, keeping newer session"
                        );
                        Ok(Some(current))
                    }
                    _ => {
                        tracing::warn!(error = %e, "Refresh rejected, signing out");
                        self.store_session(None).await;
                        self.emit(AuthEventKind::SignedOut, None);
                        Ok(None)
                    }
                }
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<()> {
        let session = self.session.read().await.clone();

        if let Some(session) = session {
            let result = self
                .http
                .post(self.auth_url("logout"))
                .header("apikey", &self.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await
                .map_err(network_error);

            // The local session goes away even when revocation fails.
            match result {
                Ok(response) => {
                    if let Err(e) = check_auth(response).await {
                        tracing::warn!(error = %e, "Session revocation rejected");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Session revocation failed"),
            }
        }

        self.store_session(None).await;
        self.emit(AuthEventKind::SignedOut, None);
        tracing::info!("Signed out");
        Ok(())
    }
}

#[async_trait]
impl RowStore for SupabaseClient {
    async fn select_one(&self, table: &str, filter: &Filter) -> Result<Row> {
        let response = self
            .rest_request(reqwest::Method::GET, table)
            .await
            .query(&[("select", "*".to_string())])
            .query(&[filter_query(filter)])
            .header(
                ACCEPT,
                HeaderValue::from_static("application/vnd.pgrst.object+json"),
            )
            .send()
            .await
            .map_err(network_error)?;

        check_rest(table, response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Database(format!("JSON parse error: {}", e)))
    }

    async fn select_many(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<Vec<Row>> {
        let mut request = self
            .rest_request(reqwest::Method::GET, table)
            .await
            .query(&[("select", "*".to_string())]);
        if let Some(filter) = filter {
            request = request.query(&[filter_query(filter)]);
        }
        if let Some(order) = order {
            request = request.query(&[order_query(order)]);
        }

        let response = request.send().await.map_err(network_error)?;
        check_rest(table, response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Database(format!("JSON parse error: {}", e)))
    }

    async fn insert(&self, table: &str, row: Row) -> Result<()> {
        let response = self
            .rest_request(reqwest::Method::POST, table)
            .await
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(network_error)?;

        check_rest(table, response).await?;
        Ok(())
    }

    async fn update(&self, table: &str, patch: Row, filter: &Filter) -> Result<()> {
        let response = self
            .rest_request(reqwest::Method::PATCH, table)
            .await
            .query(&[filter_query(filter)])
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await
            .map_err(network_error)?;

        let updated: Vec<Row> = check_rest(table, response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Database(format!("JSON parse error: {}", e)))?;

        // PostgREST answers 200 with an empty list when nothing matched.
        if updated.is_empty() {
            return Err(AppError::NotFound(format!(
                "{} where {} = {}",
                table, filter.column, filter.value
            )));
        }
        Ok(())
    }
}
