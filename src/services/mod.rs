// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - stores and controllers over the backend.

pub mod board;
pub mod history;
pub mod profile;
pub mod session;
pub mod tasks;

pub use board::{BoardController, DropPayload, LoadOutcome, MoveOutcome};
pub use history::{History, MemoryHistory};
pub use profile::{ProfileState, ProfileStore};
pub use session::{SessionState, SessionStore};
pub use tasks::TaskRepository;
