//! Access-Control Projector
//!
//! Computes, for a uid, the repositories visible to the user: the union
//! of personal assignments, department assignments, and group-derived
//! assignments. No cache; every call hits the directory, so revocations
//! are effective immediately. The caller's deadline rides through every
//! directory lookup.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::domain::entities::{normalize_all, RepoRef};
use crate::domain::ports::DirectoryStore;
use crate::domain::Deadline;
use crate::error::{ApiError, DirectoryError};

/// Service answering authorization questions from the directory projection
pub struct AccessService<D>
where
    D: DirectoryStore,
{
    directory: Arc<D>,
    default_owner: String,
}

impl<D> AccessService<D>
where
    D: DirectoryStore,
{
    pub fn new(directory: Arc<D>, default_owner: String) -> Self {
        Self {
            directory,
            default_owner,
        }
    }

    /// The user's effective repository set, normalized and deduplicated.
    pub async fn effective_repositories(
        &self,
        uid: &str,
        deadline: Deadline,
    ) -> Result<BTreeSet<RepoRef>, ApiError> {
        let user = self.directory.get_user(uid, deadline).await?;

        let mut raw: Vec<String> = user.repositories.iter().cloned().collect();

        // A dangling department key is ignored, not an error.
        if let Some(department) = &user.department {
            match self.directory.get_department(department, deadline).await {
                Ok(dept) => raw.extend(dept.repositories.iter().cloned()),
                Err(DirectoryError::NotFound(_)) => {
                    tracing::debug!(uid = %uid, department = %department, "Department missing; skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Groups are discovered by a member-attribute search, never by
        // materializing the user↔group relation in memory.
        for group in self.directory.groups_of_user(uid, deadline).await? {
            raw.extend(group.repositories.iter().cloned());
        }

        Ok(normalize_all(raw.iter(), &self.default_owner))
    }

    /// Whether `uid` may access the repository named by `raw_ref`.
    /// An unknown user is a plain deny, not an error.
    pub async fn authorize(
        &self,
        uid: &str,
        raw_ref: &str,
        deadline: Deadline,
    ) -> Result<bool, ApiError> {
        let wanted = RepoRef::parse(raw_ref, &self.default_owner).map_err(ApiError::Invalid)?;

        match self.effective_repositories(uid, deadline).await {
            Ok(set) => Ok(set.contains(&wanted)),
            Err(ApiError::Directory(DirectoryError::NotFound(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
