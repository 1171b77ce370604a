// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The fixed set of departments a profile can belong to.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use validator::ValidationError;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Department label. Stored on profiles as its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Department {
    Electronics,
    Software,
    ThreeDPrinting,
    Simulation,
    ProductDesign,
    Research,
}

impl Department {
    /// All departments in directory order.
    pub const ALL: [Department; 6] = [
        Department::Electronics,
        Department::Software,
        Department::ThreeDPrinting,
        Department::Simulation,
        Department::ProductDesign,
        Department::Research,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Department::Electronics => "Electronics",
            Department::Software => "Software",
            Department::ThreeDPrinting => "3D Printing",
            Department::Simulation => "Simulation",
            Department::ProductDesign => "Product Design",
            Department::Research => "Research",
        }
    }

    /// URL slug: lower-cased with whitespace runs replaced by `-`.
    pub fn slug(self) -> String {
        self.name()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Department {
    type Err = UnknownDepartment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Department::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| UnknownDepartment(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown department: {0:?}")]
pub struct UnknownDepartment(pub String);

/// `validator` hook for form fields that must name a department.
pub fn validate_department(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<Department>()
        .map(|_| ())
        .map_err(|_| {
            let mut err = ValidationError::new("department");
            err.message = Some("Please select a department.".into());
            err
        })
}

/// Access level shown in the department directory.
///
/// Purely informational; nothing is enforced from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum DepartmentAccess {
    Full,
    ViewOnly,
}

/// Directory entry for API responses.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DepartmentEntry {
    pub name: String,
    pub slug: String,
    pub access: DepartmentAccess,
}

/// Build the directory as seen by a user in `own` department.
pub fn directory(own: Option<&str>) -> Vec<DepartmentEntry> {
    Department::ALL
        .into_iter()
        .map(|dept| DepartmentEntry {
            name: dept.name().to_string(),
            slug: dept.slug(),
            access: if own == Some(dept.name()) {
                DepartmentAccess::Full
            } else {
                DepartmentAccess::ViewOnly
            },
        })
        .collect()
}
