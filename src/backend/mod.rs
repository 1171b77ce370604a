// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Hosted backend seams: the auth provider and the row store.
//!
//! Two implementations exist:
//! - [`supabase::SupabaseClient`] talks to GoTrue and PostgREST over HTTP
//! - [`memory`] keeps everything in process (tests, offline development)

pub mod memory;
pub mod supabase;

pub use memory::{MemoryAuth, MemoryRowStore};
pub use supabase::SupabaseClient;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::Session;
use crate::time_utils::expiry_from;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Table names as constants.
pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const TASKS: &str = "tasks";
}

/// Capacity of the auth event channel per subscriber.
pub const AUTH_EVENT_CAPACITY: usize = 16;

/// A row as returned by the store.
pub type Row = Value;

/// Equality filter on a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `row` satisfies this filter (strings and numbers compare textually).
    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

/// Single-column ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

impl Order {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Kinds of auth state change pushed by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Auth state change with the session that is current afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

/// Parameters a magic link carries back in the URL fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MagicLinkCallback {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    /// `magiclink`, `signup`, `recovery`, ...
    pub kind: Option<String>,
}

impl MagicLinkCallback {
    /// Parse `key=value&...` fragment parameters (without the leading `#`).
    pub fn from_fragment(fragment: &str) -> Self {
        let mut callback = Self::default();

        for pair in fragment.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(&value.replace('+', " "))
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            if value.is_empty() {
                continue;
            }

            match key {
                "access_token" => callback.access_token = Some(value),
                "refresh_token" => callback.refresh_token = Some(value),
                "token_type" => callback.token_type = Some(value),
                "expires_in" => callback.expires_in = value.parse().ok(),
                "expires_at" => callback.expires_at = value.parse().ok(),
                "type" => callback.kind = Some(value),
                _ => {}
            }
        }

        callback
    }

    /// True when the fragment came from an auth redirect.
    pub fn is_auth_callback(&self) -> bool {
        self.access_token.is_some() || self.is_recovery()
    }

    pub fn is_recovery(&self) -> bool {
        self.kind.as_deref() == Some("recovery")
    }

    /// Absolute expiry, preferring `expires_at` over `now + expires_in`.
    pub fn expiry(&self, now_secs: i64) -> Option<i64> {
        self.expires_at
            .or_else(|| expiry_from(now_secs, self.expires_in))
    }
}

/// Passwordless auth provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Email a one-time sign-in link carrying `metadata` for the new user.
    async fn sign_in_with_magic_link(
        &self,
        email: &str,
        metadata: Value,
        redirect_url: &str,
    ) -> Result<()>;

    /// Turn the tokens of a magic-link redirect into the current session.
    async fn complete_magic_link(&self, callback: &MagicLinkCallback) -> Result<Session>;

    /// Session cached or persisted by the provider, refreshed if about to expire.
    async fn current_session(&self) -> Result<Option<Session>>;

    /// New receiver for auth state changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Revoke the current session.
    async fn sign_out(&self) -> Result<()>;
}

/// Row storage with per-table queries.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Exactly one row; [`AppError::NotFound`] when none matches.
    async fn select_one(&self, table: &str, filter: &Filter) -> Result<Row>;

    async fn select_many(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<Vec<Row>>;

    /// Insert a row; [`AppError::Constraint`] on duplicate key.
    async fn insert(&self, table: &str, row: Row) -> Result<()>;

    /// Patch matching rows; [`AppError::NotFound`] when none matched.
    async fn update(&self, table: &str, patch: Row, filter: &Filter) -> Result<()>;
}

/// Deserialize a row into a model, reporting malformed rows as store errors.
pub fn decode_row<T: serde::de::DeserializeOwned>(table: &str, row: Row) -> Result<T> {
    serde_json::from_value(row)
        .map_err(|e| AppError::Database(format!("Malformed {} row: {}", table, e)))
}

/// Build the configured backend.
pub fn connect(config: &Config) -> Result<(Arc<dyn AuthProvider>, Arc<dyn RowStore>)> {
    if config.offline {
        tracing::info!("Using in-memory backend (offline mode)");
        let auth: Arc<dyn AuthProvider> = Arc::new(MemoryAuth::new());
        let rows: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new());
        return Ok((auth, rows));
    }

    let client = Arc::new(SupabaseClient::new(config)?);
    tracing::info!(url = %config.supabase_url, "Using Supabase backend");
    let auth: Arc<dyn AuthProvider> = client.clone();
    let rows: Arc<dyn RowStore> = client;
    Ok((auth, rows))
}
