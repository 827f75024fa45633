//! Directory store port trait
//!
//! Uniform CRUD+search contract over Users, Groups and Departments; hides
//! the directory's attribute-level quirks from the application layer.
//!
//! Every operation takes the caller's [`Deadline`]. When that deadline
//! elapses before the work completes the operation fails with
//! `DirectoryError::Cancelled`, distinct from the pool's own
//! pool-exhausted and the per-connection timeout.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::entities::{
    CollabGroup, Department, Group, NewCollabGroup, NewDepartment, NewGroup, NewUser, User,
    UserQuery, UserUpdate,
};
use crate::domain::Deadline;
use crate::error::DirectoryError;

/// Outcome of a cascading group mutation.
///
/// The triggering write is durable even when cascade steps fail; failures
/// are reported here and repaired by the next reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct CascadeReport {
    /// Members whose repository attribute was rewritten
    pub updated: Vec<String>,
    /// Members the cascade could not update, with the failure message
    pub failed: Vec<(String, String)>,
}

impl CascadeReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Port trait for the directory
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    // Users

    async fn create_user(&self, new: &NewUser, deadline: Deadline)
        -> Result<User, DirectoryError>;

    async fn get_user(&self, uid: &str, deadline: Deadline) -> Result<User, DirectoryError>;

    async fn list_users(&self, deadline: Deadline) -> Result<Vec<User>, DirectoryError>;

    /// Search by partial-match substrings and exact-match fields; see
    /// [`UserQuery`] for which field is which.
    async fn search_users(
        &self,
        query: &UserQuery,
        deadline: Deadline,
    ) -> Result<Vec<User>, DirectoryError>;

    /// Apply an update; every field is independently optional and an
    /// empty repository set clears the assignment.
    async fn update_user(
        &self,
        uid: &str,
        update: &UserUpdate,
        deadline: Deadline,
    ) -> Result<User, DirectoryError>;

    async fn delete_user(&self, uid: &str, deadline: Deadline) -> Result<(), DirectoryError>;

    /// Attempt a fresh bind with the user's credentials on a dedicated
    /// session (never from the pool). True only on bind success.
    async fn authenticate(
        &self,
        uid: &str,
        password: &str,
        deadline: Deadline,
    ) -> Result<bool, DirectoryError>;

    // Groups

    /// Create a group, seeding the placeholder member the schema requires.
    async fn create_group(
        &self,
        new: &NewGroup,
        deadline: Deadline,
    ) -> Result<Group, DirectoryError>;

    async fn get_group(&self, cn: &str, deadline: Deadline) -> Result<Group, DirectoryError>;

    async fn list_groups(&self, deadline: Deadline) -> Result<Vec<Group>, DirectoryError>;

    async fn delete_group(
        &self,
        cn: &str,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError>;

    /// Add a member and recompute their repository attribute.
    async fn add_group_member(
        &self,
        cn: &str,
        uid: &str,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError>;

    /// Remove a member and recompute their repository attribute.
    async fn remove_group_member(
        &self,
        cn: &str,
        uid: &str,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError>;

    /// Replace the group's repository set and cascade into every
    /// non-placeholder member.
    async fn assign_group_repositories(
        &self,
        cn: &str,
        repositories: &BTreeSet<String>,
        deadline: Deadline,
    ) -> Result<CascadeReport, DirectoryError>;

    /// Groups listing `uid` as a member, discovered by a filtered search
    /// on the member attribute (never joined in memory).
    async fn groups_of_user(
        &self,
        uid: &str,
        deadline: Deadline,
    ) -> Result<Vec<Group>, DirectoryError>;

    // Departments

    async fn create_department(
        &self,
        new: &NewDepartment,
        deadline: Deadline,
    ) -> Result<Department, DirectoryError>;

    async fn get_department(
        &self,
        ou: &str,
        deadline: Deadline,
    ) -> Result<Department, DirectoryError>;

    async fn list_departments(&self, deadline: Deadline)
        -> Result<Vec<Department>, DirectoryError>;

    async fn delete_department(&self, ou: &str, deadline: Deadline)
        -> Result<(), DirectoryError>;

    /// Replace the department's repository set. No cascade: department
    /// membership is a derived view.
    async fn assign_department_repositories(
        &self,
        ou: &str,
        repositories: &BTreeSet<String>,
        deadline: Deadline,
    ) -> Result<Department, DirectoryError>;

    /// Uids whose department key equals `ou`.
    async fn department_members(
        &self,
        ou: &str,
        deadline: Deadline,
    ) -> Result<Vec<String>, DirectoryError>;

    // Collab groups

    async fn create_collab_group(
        &self,
        new: &NewCollabGroup,
        deadline: Deadline,
    ) -> Result<CollabGroup, DirectoryError>;

    async fn get_collab_group(
        &self,
        cn: &str,
        deadline: Deadline,
    ) -> Result<CollabGroup, DirectoryError>;

    /// Resolved member set: base-department members ∪ extra members,
    /// computed at read time.
    async fn resolve_collab_members(
        &self,
        cn: &str,
        deadline: Deadline,
    ) -> Result<Vec<String>, DirectoryError>;
}
