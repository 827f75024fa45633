//! Department directory entity
//!
//! Department membership is derived, never stored: a user belongs to the
//! department whose `ou` equals the user's department key.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A directory department
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub ou: String,
    pub description: Option<String>,
    pub manager: Option<String>,
    /// Raw assigned repository refs
    pub repositories: BTreeSet<String>,
}

/// Data needed to create a department
#[derive(Debug, Clone, Deserialize)]
pub struct NewDepartment {
    pub ou: String,
    pub description: Option<String>,
    pub manager: Option<String>,
    #[serde(default)]
    pub repositories: BTreeSet<String>,
}
