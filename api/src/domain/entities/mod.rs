//! Domain entities
//!
//! Users, Groups, Departments and CollabGroups are kept as disjoint types;
//! what they share is the repository-ref slice, not a common supertype.

pub mod department;
pub mod group;
pub mod repo_ref;
pub mod user;
pub mod workspace;

pub use department::{Department, NewDepartment};
pub use group::{
    is_collab_cn, resolve_collab_members, CollabGroup, Group, NewCollabGroup, NewGroup,
    COLLAB_PREFIX, PLACEHOLDER_UID,
};
pub use repo_ref::{normalize_all, RepoRef};
pub use user::{validate_uid, NewUser, User, UserQuery, UserUpdate};
pub use workspace::{
    project_status, sanitize_label, PodState, ProvisionOutcome, Workspace, WorkspaceNames,
    WorkspaceStatus,
};
