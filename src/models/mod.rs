// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod department;
pub mod profile;
pub mod task;
pub mod user;

pub use department::{Department, DepartmentAccess, DepartmentEntry};
pub use profile::{NewProfile, Profile, ProfileUpdate};
pub use task::{Task, TaskPriority, TaskStatus, UnknownStatus};
pub use user::{Session, User};
