// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session store: the current session, kept in step with the auth provider.
//!
//! The store subscribes once to the provider's auth events and republishes
//! the resulting session through a `watch` channel. Bootstrap resolves the
//! initial session, either from a magic-link redirect visible in the
//! location fragment or from whatever the provider has persisted.

use crate::backend::{AuthEvent, AuthEventKind, AuthProvider, MagicLinkCallback, RowStore};
use crate::error::Result;
use crate::models::{Session, User};
use crate::services::history::{without_fragment, History};
use crate::services::profile::provision_profile;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Published session read model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub session: Option<Session>,
    /// True until the first session check completes
    pub loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session: None,
            loading: true,
        }
    }
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

/// Flips `loading` to false once, when dropped.
struct LoadingGuard<'a> {
    state: &'a watch::Sender<SessionState>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            let was_loading = state.loading;
            state.loading = false;
            was_loading
        });
    }
}

pub struct SessionStore {
    auth: Arc<dyn AuthProvider>,
    rows: Arc<dyn RowStore>,
    state: watch::Sender<SessionState>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// User whose profile row was last ensured
    provisioned: tokio::sync::Mutex<Option<String>>,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthProvider>, rows: Arc<dyn RowStore>) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::default());
        Arc::new(Self {
            auth,
            rows,
            state,
            listener: Mutex::new(None),
            provisioned: tokio::sync::Mutex::new(None),
        })
    }

    /// Start listening for provider auth events. Calling again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let mut events = self.auth.subscribe();
        let store: Weak<Self> = Arc::downgrade(self);
        *listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(store) = store.upgrade() else {
                            break;
                        };
                        store.handle_auth_event(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Auth event listener stopped");
        }));
    }

    /// Stop listening for auth events.
    pub fn unsubscribe(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Apply one auth event.
    ///
    /// A sign-in first makes sure the user has a profile row, so readers of
    /// the new session find one.
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        tracing::debug!(
            kind = ?event.kind,
            user_id = event.session.as_ref().map(|s| s.user.id.as_str()),
            "Auth event"
        );

        match (event.kind, &event.session) {
            (AuthEventKind::SignedIn, Some(session)) => {
                // Bootstrap and the listener both see one sign-in.
                let mut provisioned = self.provisioned.lock().await;
                if provisioned.as_deref() != Some(session.user.id.as_str()) {
                    provision_profile(self.rows.as_ref(), &session.user).await;
                    *provisioned = Some(session.user.id.clone());
                }
            }
            (AuthEventKind::SignedOut, _) => *self.provisioned.lock().await = None,
            _ => {}
        }

        self.state.send_replace(SessionState {
            session: event.session,
            loading: false,
        });
    }

    /// Resolve the initial session.
    ///
    /// A magic-link redirect in the location fragment is completed first and
    /// the fragment is removed from the visible URL. Failures are logged and
    /// leave the store signed out; `loading` ends false either way.
    pub async fn bootstrap(&self, history: &dyn History) -> Option<Session> {
        let _loading = LoadingGuard { state: &self.state };

        let location = history.location();
        let callback = location
            .fragment()
            .map(MagicLinkCallback::from_fragment)
            .unwrap_or_default();

        if callback.is_auth_callback() {
            history.replace_state(without_fragment(&location));

            if callback.access_token.is_some() {
                match self.auth.complete_magic_link(&callback).await {
                    // Apply the sign-in here too, so the profile row exists
                    // before the session is published. The provider's own
                    // event for it does not provision again.
                    Ok(session) => {
                        let kind = if callback.is_recovery() {
                            AuthEventKind::PasswordRecovery
                        } else {
                            AuthEventKind::SignedIn
                        };
                        self.handle_auth_event(AuthEvent {
                            kind,
                            session: Some(session),
                        })
                        .await;
                    }
                    Err(e) => tracing::warn!(error = %e, "Magic link could not be completed"),
                }
            }
        }

        let session = match self.auth.current_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Session check failed");
                None
            }
        };

        self.state.send_replace(SessionState {
            session: session.clone(),
            loading: false,
        });
        if let Some(session) = &session {
            tracing::info!(user_id = %session.user.id, "Session resolved");
        }

        session
    }

    /// Revoke the session with the provider and drop it locally.
    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await?;
        self.state.send_replace(SessionState {
            session: None,
            loading: false,
        });
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Receiver notified on every session change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
