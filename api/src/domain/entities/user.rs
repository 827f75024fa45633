//! User directory entity
//!
//! A user is identified by an immutable `uid`. The repository set stored on
//! the entry is raw (as written by admins or the group cascade); callers
//! that need canonical refs normalize through [`crate::domain::entities::RepoRef`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A directory user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub display_name: Option<String>,
    pub surname: Option<String>,
    pub given_name: Option<String>,
    pub email: Option<String>,
    /// Department key; a user belongs to the department whose `ou` equals it
    pub department: Option<String>,
    pub uid_number: u32,
    pub gid_number: u32,
    pub home_directory: String,
    /// Raw assigned repository refs
    pub repositories: BTreeSet<String>,
}

/// Data needed to create a user
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub surname: Option<String>,
    pub given_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    #[serde(default)]
    pub repositories: BTreeSet<String>,
    /// Initial bind password; omitted entries cannot authenticate
    pub password: Option<String>,
}

/// Partial user update; every field is independently optional.
///
/// `repositories: Some(empty set)` means "clear the assignment", while
/// `None` leaves the stored set untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub display_name: Option<String>,
    pub surname: Option<String>,
    pub given_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub password: Option<String>,
    pub repositories: Option<BTreeSet<String>>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.surname.is_none()
            && self.given_name.is_none()
            && self.email.is_none()
            && self.department.is_none()
            && self.password.is_none()
            && self.repositories.is_none()
    }
}

/// Search filter over users.
///
/// `uid`, `display_name`, `surname`, `given_name` and `email` match as
/// substrings; `department` and the numeric ids match exactly;
/// `repository` is a best-effort substring match on the repository
/// attribute.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserQuery {
    pub uid: Option<String>,
    pub display_name: Option<String>,
    pub surname: Option<String>,
    pub given_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub uid_number: Option<u32>,
    pub gid_number: Option<u32>,
    pub repository: Option<String>,
}

impl UserQuery {
    pub fn is_empty(&self) -> bool {
        self.uid.is_none()
            && self.display_name.is_none()
            && self.surname.is_none()
            && self.given_name.is_none()
            && self.email.is_none()
            && self.department.is_none()
            && self.uid_number.is_none()
            && self.gid_number.is_none()
            && self.repository.is_none()
    }
}

/// Validate a uid for use as a directory key.
///
/// Uids are immutable once created, so malformed ones are rejected up
/// front rather than escaped downstream.
pub fn validate_uid(uid: &str) -> Result<(), String> {
    if uid.is_empty() {
        return Err("uid must not be empty".to_string());
    }
    if uid.len() > 64 {
        return Err("uid must be at most 64 characters".to_string());
    }
    if !uid
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@'))
    {
        return Err(format!("uid contains unsupported characters: {:?}", uid));
    }
    Ok(())
}
