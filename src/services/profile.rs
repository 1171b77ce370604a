// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile store: the signed-in user's profile row.

use crate::backend::{decode_row, tables, Filter, RowStore};
use crate::error::{AppError, Result};
use crate::models::{NewProfile, Profile, ProfileUpdate, User};
use crate::services::session::{SessionState, SessionStore};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use validator::Validate;

/// Published profile read model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileState {
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl Default for ProfileState {
    fn default() -> Self {
        Self {
            profile: None,
            loading: true,
        }
    }
}

pub struct ProfileStore {
    rows: Arc<dyn RowStore>,
    sessions: Arc<SessionStore>,
    state: watch::Sender<ProfileState>,
    /// User the profile is being kept for; `None` until the first recompute
    tracked: Mutex<Option<Option<String>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ProfileStore {
    pub fn new(rows: Arc<dyn RowStore>, sessions: Arc<SessionStore>) -> Arc<Self> {
        let (state, _) = watch::channel(ProfileState::default());
        Arc::new(Self {
            rows,
            sessions,
            state,
            tracked: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    /// Follow the session store. Calling again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let mut sessions = self.sessions.subscribe();
        let store: Weak<Self> = Arc::downgrade(self);
        *listener = Some(tokio::spawn(async move {
            loop {
                let state = sessions.borrow_and_update().clone();
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.on_session(&state).await;
                drop(store);

                if sessions.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Recompute if the user identity changed.
    async fn on_session(&self, state: &SessionState) {
        if state.loading && state.session.is_none() {
            return;
        }

        let user_id = state.user().map(|u| u.id.clone());
        {
            let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
            if tracked.as_ref() == Some(&user_id) {
                return;
            }
            *tracked = Some(user_id.clone());
        }

        match user_id {
            Some(user_id) => self.fetch(&user_id).await,
            None => {
                self.state.send_replace(ProfileState {
                    profile: None,
                    loading: false,
                });
            }
        }
    }

    fn is_current(&self, user_id: &str) -> bool {
        let tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(tracked.as_ref(), Some(Some(id)) if id == user_id)
    }

    async fn fetch(&self, user_id: &str) {
        self.state.send_modify(|state| state.loading = true);

        let result = self
            .rows
            .select_one(tables::PROFILES, &Filter::eq("id", user_id))
            .await
            .and_then(|row| decode_row::<Profile>(tables::PROFILES, row));

        if !self.is_current(user_id) {
            tracing::debug!(user_id, "Discarding profile for previous user");
            return;
        }

        self.state.send_modify(|state| {
            state.loading = false;
            match result {
                Ok(profile) => state.profile = Some(profile),
                Err(e) if e.is_not_found() => state.profile = None,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Profile fetch failed");
                    if state.profile.as_ref().is_some_and(|p| p.id != user_id) {
                        state.profile = None;
                    }
                }
            }
        });
    }

    /// Re-fetch the profile of the current user.
    pub async fn refresh(&self) -> Option<Profile> {
        let user_id = self.sessions.current_user().map(|u| u.id);
        *self.tracked.lock().unwrap_or_else(PoisonError::into_inner) = Some(user_id.clone());

        match user_id {
            Some(user_id) => self.fetch(&user_id).await,
            None => {
                self.state.send_replace(ProfileState {
                    profile: None,
                    loading: false,
                });
            }
        }
        self.profile()
    }

    /// Validate and store `update`, then refresh.
    pub async fn save(&self, update: ProfileUpdate) -> Result<Option<Profile>> {
        let update = update.normalized();
        update.validate()?;

        let user = self.sessions.current_user().ok_or(AppError::Unauthorized)?;
        self.rows
            .update(
                tables::PROFILES,
                json!({
                    "full_name": update.full_name,
                    "department_id": update.department_id,
                }),
                &Filter::eq("id", user.id.as_str()),
            )
            .await?;
        tracing::info!(user_id = %user.id, "Profile saved");

        Ok(self.refresh().await)
    }

    pub fn state(&self) -> ProfileState {
        self.state.borrow().clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn subscribe(&self) -> watch::Receiver<ProfileState> {
        self.state.subscribe()
    }
}

impl Drop for ProfileStore {
    fn drop(&mut self) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Create a profile row for `user` unless one exists.
///
/// Best effort: failures are logged, never returned.
pub async fn provision_profile(rows: &dyn RowStore, user: &User) {
    let filter = Filter::eq("id", user.id.as_str());
    match rows.select_one(tables::PROFILES, &filter).await {
        Ok(_) => return,
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Profile lookup failed, creating");
        }
    }

    let row = match serde_json::to_value(NewProfile::from_user(user)) {
        Ok(row) => row,
        Err(e) => {
            tracing::error!(user_id = %user.id, error = %e, "Profile row not serializable");
            return;
        }
    };

    match rows.insert(tables::PROFILES, row).await {
        Ok(()) => tracing::info!(user_id = %user.id, "Profile created"),
        Err(e) if e.is_constraint_violation() => {
            tracing::debug!(user_id = %user.id, "Profile already exists");
        }
        Err(e) => tracing::error!(user_id = %user.id, error = %e, "Profile creation failed"),
    }
}
