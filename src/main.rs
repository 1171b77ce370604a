// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Taski API Server
//!
//! Serves the session, profile and task board of one Taski client over a
//! local JSON API, backed by Supabase auth and rows.

use std::sync::Arc;
use taski::{backend, config::Config, services::MemoryHistory, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    let config = Config::from_env()?;
    tracing::info!(port = config.port, offline = config.offline, "Starting Taski API");

    let (auth, rows) = backend::connect(&config)?;
    let state = Arc::new(AppState::new(config.clone(), auth, rows));
    state.start();

    // Pick up a session persisted by an earlier run
    let history = MemoryHistory::parse(&config.frontend_url)?;
    if let Some(session) = state.sessions.bootstrap(&history).await {
        tracing::info!(user_id = %session.user.id, "Restored session");
    }

    let app = taski::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("taski=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
