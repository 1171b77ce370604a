// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Taski: a small task board with magic-link sign-in
//!
//! This crate keeps the session, profile and task board state of one
//! client and serves it as a JSON API. Auth and rows live in Supabase.

pub mod backend;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use backend::{AuthProvider, RowStore};
use config::Config;
use services::{BoardController, ProfileStore, SessionStore, TaskRepository};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub auth: Arc<dyn AuthProvider>,
    pub sessions: Arc<SessionStore>,
    pub profiles: Arc<ProfileStore>,
    pub board: BoardController,
}

impl AppState {
    /// Wire the stores over `auth` and `rows`. Call [`AppState::start`] to
    /// begin following auth events.
    pub fn new(config: Config, auth: Arc<dyn AuthProvider>, rows: Arc<dyn RowStore>) -> Self {
        let sessions = SessionStore::new(auth.clone(), rows.clone());
        let profiles = ProfileStore::new(rows.clone(), sessions.clone());
        let board = BoardController::new(TaskRepository::new(rows));

        Self {
            config,
            auth,
            sessions,
            profiles,
            board,
        }
    }

    /// Start the session and profile listeners. Needs a tokio runtime.
    pub fn start(&self) {
        self.sessions.start();
        self.profiles.start();
    }
}
