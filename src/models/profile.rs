// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile rows from the `profiles` table.

use crate::models::department::validate_department;
use crate::models::User;
use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Application profile, keyed 1:1 by user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Profile {
    /// Same as the user id
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
    /// Mirrors the user's email
    #[serde(default)]
    pub email: Option<String>,
    /// Department display name
    #[serde(default)]
    pub department_id: Option<String>,
    /// Placeholder, never written
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Profile {
    /// Upper-cased first letter of the name, `U` when there is none.
    pub fn initial(&self) -> char {
        self.full_name
            .chars()
            .next()
            .and_then(|c| c.to_uppercase().next())
            .unwrap_or('U')
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Row inserted on first sign-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: Option<String>,
    pub full_name: String,
    pub department_id: Option<String>,
}

impl NewProfile {
    /// Seed a profile from the metadata captured at magic-link sign-in.
    pub fn from_user(user: &User) -> Self {
        let full_name = user
            .metadata_str("full_name")
            .or_else(|| user.email_local_part())
            .unwrap_or("User")
            .to_string();

        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name,
            department_id: user.metadata_str("department_id").map(str::to_string),
        }
    }
}

/// User-initiated profile save.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(custom(function = "validate_required_name"))]
    pub full_name: String,
    #[validate(custom(function = "validate_department"))]
    pub department_id: String,
}

impl ProfileUpdate {
    /// Trim user input before validation.
    pub fn normalized(self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            department_id: self.department_id.trim().to_string(),
        }
    }
}

pub(crate) fn validate_required_name(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("Name is required.".into());
        return Err(err);
    }
    Ok(())
}
