// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for timestamps written to rows and tokens.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time as unix seconds, the unit token expiries use.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Absolute expiry for a token valid for `expires_in` seconds from `now`.
pub fn expiry_from(now: i64, expires_in: Option<i64>) -> Option<i64> {
    expires_in.map(|secs| now.saturating_add(secs))
}
