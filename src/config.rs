// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default bound on every call to the hosted backend.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Supabase project URL (e.g. https://xyz.supabase.co)
    pub supabase_url: String,
    /// Supabase anonymous (publishable) API key
    pub supabase_anon_key: String,
    /// Frontend URL; magic links redirect here
    pub frontend_url: String,
    /// Server port
    pub port: u16,
    /// Where the current session is persisted between runs
    pub session_file: PathBuf,
    /// Upper bound for a single backend HTTP call
    pub request_timeout: Duration,
    /// Use the in-memory backend instead of Supabase
    pub offline: bool,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            supabase_url: "http://127.0.0.1:54321".to_string(),
            supabase_anon_key: "test_anon_key".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            port: 8080,
            session_file: PathBuf::from(".taski/session.json"),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            offline: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let offline = env::var("TASKI_OFFLINE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        // Offline mode never talks to Supabase, so the credentials become optional.
        let supabase_url = match env::var("SUPABASE_URL") {
            Ok(url) => url.trim().trim_end_matches('/').to_string(),
            Err(_) if offline => Config::default().supabase_url,
            Err(_) => return Err(ConfigError::Missing("SUPABASE_URL")),
        };
        let supabase_anon_key = match env::var("SUPABASE_ANON_KEY") {
            Ok(key) => key.trim().to_string(),
            Err(_) if offline => Config::default().supabase_anon_key,
            Err(_) => return Err(ConfigError::Missing("SUPABASE_ANON_KEY")),
        };

        let request_timeout_secs = match env::var("TASKI_REQUEST_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::Invalid("TASKI_REQUEST_TIMEOUT_SECS", raw))?,
            Err(_) => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            session_file: env::var("TASKI_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".taski/session.json")),
            request_timeout: Duration::from_secs(request_timeout_secs),
            offline,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
