// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process backend for tests and offline development.
//!
//! `MemoryAuth` accepts any magic-link callback once a link has been
//! requested, minting a local user from the requested email and metadata.
//! `MemoryRowStore` records every call and can be told to fail the next
//! operation of a given kind.

use crate::backend::{
    AuthEvent, AuthEventKind, AuthProvider, Filter, MagicLinkCallback, Order, Row, RowStore,
    AUTH_EVENT_CAPACITY,
};
use crate::error::{AppError, Result};
use crate::models::{Session, User};
use crate::time_utils::unix_now;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{broadcast, RwLock};

/// Lifetime of sessions minted by [`MemoryAuth`].
const LOCAL_SESSION_SECS: i64 = 3600;

// ─── Auth ────────────────────────────────────────────────────────

/// A magic link that would have been emailed.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMagicLink {
    pub email: String,
    pub metadata: Value,
    pub redirect_url: String,
}

/// In-memory auth provider.
pub struct MemoryAuth {
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
    /// Users that a given access token resolves to
    tokens: DashMap<String, User>,
    sent: Mutex<Vec<SentMagicLink>>,
    next_user: AtomicU64,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuth {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            session: RwLock::new(None),
            events,
            tokens: DashMap::new(),
            sent: Mutex::new(Vec::new()),
            next_user: AtomicU64::new(1),
        }
    }

    /// Make `access_token` resolve to `user` on callback completion.
    pub fn register_token(&self, access_token: &str, user: User) {
        self.tokens.insert(access_token.to_string(), user);
    }

    /// Install a session as if it had been persisted by an earlier run.
    pub async fn restore_session(&self, session: Option<Session>) {
        *self.session.write().await = session;
    }

    /// Replace the session and push `kind` to subscribers.
    pub async fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        *self.session.write().await = session.clone();
        let _ = self.events.send(AuthEvent { kind, session });
    }

    /// Magic links requested so far.
    pub fn sent_links(&self) -> Vec<SentMagicLink> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mint_user(&self) -> Option<User> {
        let sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        let link = sent.last()?;
        let n = self.next_user.fetch_add(1, AtomicOrdering::SeqCst);
        Some(User {
            id: format!("local-{}", n),
            email: Some(link.email.clone()),
            user_metadata: link.metadata.as_object().cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in_with_magic_link(
        &self,
        email: &str,
        metadata: Value,
        redirect_url: &str,
    ) -> Result<()> {
        tracing::info!(email, "Magic link requested (in-memory, not sent)");
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMagicLink {
                email: email.to_string(),
                metadata,
                redirect_url: redirect_url.to_string(),
            });
        Ok(())
    }

    async fn complete_magic_link(&self, callback: &MagicLinkCallback) -> Result<Session> {
        let access_token = callback
            .access_token
            .clone()
            .ok_or_else(|| AppError::Provider("Callback carries no access token".to_string()))?;

        let known = self.tokens.get(&access_token).map(|u| u.value().clone());
        let user = match known {
            Some(user) => user,
            None => {
                let user = self.mint_user().ok_or_else(|| {
                    AppError::Provider("Invalid or expired magic link".to_string())
                })?;
                self.tokens.insert(access_token.clone(), user.clone());
                user
            }
        };

        let now = unix_now();
        let session = Session {
            access_token,
            refresh_token: callback.refresh_token.clone().unwrap_or_default(),
            token_type: callback
                .token_type
                .clone()
                .unwrap_or_else(|| "bearer".to_string()),
            expires_at: callback.expiry(now).or(Some(now + LOCAL_SESSION_SECS)),
            user,
        };

        let kind = if callback.is_recovery() {
            AuthEventKind::PasswordRecovery
        } else {
            AuthEventKind::SignedIn
        };
        self.emit(kind, Some(session.clone())).await;

        Ok(session)
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        Ok(self.session.read().await.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<()> {
        self.emit(AuthEventKind::SignedOut, None).await;
        Ok(())
    }
}

// ─── Rows ────────────────────────────────────────────────────────

/// Row store operation kinds, for failure injection and call records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SelectOne,
    SelectMany,
    Insert,
    Update,
}

/// One call made against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub op: Operation,
    pub table: String,
    /// Inserted row or update patch
    pub payload: Option<Row>,
    pub filter: Option<Filter>,
}

/// In-memory row store keyed by table name.
#[derive(Default)]
pub struct MemoryRowStore {
    tables: DashMap<String, Vec<Row>>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<Operation, VecDeque<AppError>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of `table` without recording a call.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables.insert(table.to_string(), rows);
    }

    /// Current contents of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    /// Make the next `op` fail with `error`. Queued failures are used in order.
    pub fn fail_next(&self, op: Operation, error: AppError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls of one kind.
    pub fn calls_of(&self, op: Operation) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    fn record(&self, op: Operation, table: &str, payload: Option<Row>, filter: Option<&Filter>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                op,
                table: table.to_string(),
                payload,
                filter: filter.cloned(),
            });
    }

    fn take_failure(&self, op: Operation) -> Result<()> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn select_one(&self, table: &str, filter: &Filter) -> Result<Row> {
        self.record(Operation::SelectOne, table, None, Some(filter));
        self.take_failure(Operation::SelectOne)?;

        self.tables
            .get(table)
            .and_then(|rows| rows.iter().find(|row| filter.matches(row)).cloned())
            .ok_or_else(|| {
                AppError::NotFound(format!("{} where {} = {}", table, filter.column, filter.value))
            })
    }

    async fn select_many(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<Vec<Row>> {
        self.record(Operation::SelectMany, table, None, filter);
        self.take_failure(Operation::SelectMany)?;

        let mut rows: Vec<Row> = self
            .rows(table)
            .into_iter()
            .filter(|row| filter.map_or(true, |f| f.matches(row)))
            .collect();

        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<()> {
        self.record(Operation::Insert, table, Some(row.clone()), None);
        self.take_failure(Operation::Insert)?;

        let mut rows = self.tables.entry(table.to_string()).or_default();
        if let Some(id) = row.get("id") {
            if rows.iter().any(|existing| existing.get("id") == Some(id)) {
                return Err(AppError::Constraint(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    table
                )));
            }
        }
        rows.push(row);
        Ok(())
    }

    async fn update(&self, table: &str, patch: Row, filter: &Filter) -> Result<()> {
        self.record(Operation::Update, table, Some(patch.clone()), Some(filter));
        self.take_failure(Operation::Update)?;

        let Some(fields) = patch.as_object() else {
            return Err(AppError::BadRequest("Update patch must be an object".to_string()));
        };

        let mut matched = 0;
        if let Some(mut rows) = self.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                if let Some(target) = row.as_object_mut() {
                    for (key, value) in fields {
                        target.insert(key.clone(), value.clone());
                    }
                }
                matched += 1;
            }
        }

        if matched == 0 {
            return Err(AppError::NotFound(format!(
                "{} where {} = {}",
                table, filter.column, filter.value
            )));
        }
        Ok(())
    }
}
