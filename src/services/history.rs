// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The visible location seen by session bootstrap.

use crate::error::{AppError, Result};
use reqwest::Url;
use std::sync::{Mutex, PoisonError};

/// Navigation history of the client.
pub trait History: Send + Sync {
    /// Currently visible URL.
    fn location(&self) -> Url;

    /// Replace the current entry without adding a new one.
    fn replace_state(&self, url: Url);
}

/// History kept in memory, one entry per navigation.
#[derive(Debug)]
pub struct MemoryHistory {
    entries: Mutex<Vec<Url>>,
}

impl MemoryHistory {
    pub fn new(initial: Url) -> Self {
        Self {
            entries: Mutex::new(vec![initial]),
        }
    }

    /// Parse `url` as the initial entry.
    pub fn parse(url: &str) -> Result<Self> {
        Url::parse(url)
            .map(Self::new)
            .map_err(|e| AppError::BadRequest(format!("Invalid URL {}: {}", url, e)))
    }

    /// Number of history entries.
    pub fn depth(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl History for MemoryHistory {
    fn location(&self) -> Url {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // Never empty: constructed with one entry.
        entries[entries.len() - 1].clone()
    }

    fn replace_state(&self, url: Url) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = entries.last_mut() {
            *last = url;
        } else {
            entries.push(url);
        }
    }
}

/// `url` with its fragment removed.
pub fn without_fragment(url: &Url) -> Url {
    let mut clean = url.clone();
    clean.set_fragment(None);
    clean
}
