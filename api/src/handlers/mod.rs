//! HTTP handlers
//!
//! Axum request handlers for the API endpoints.

pub mod access;
pub mod departments;
pub mod groups;
pub mod repos;
pub mod users;
pub mod webhooks;
pub mod workspaces;

pub use access::{check_access, get_projection};
pub use departments::{
    assign_repositories as assign_department_repositories, create_department, delete_department,
    department_members, get_department, list_departments,
};
pub use groups::{
    add_member, assign_repositories as assign_group_repositories, create_collab_group,
    create_group, delete_group, get_group, list_groups, remove_member, resolve_collab_members,
};
pub use repos::{
    create_branch, create_repo, delete_branch, delete_repo, fork_repo, get_repo, list_branches,
    list_repos, migrate_repo,
};
pub use users::{
    assign_user_repositories, authenticate_user, create_user, delete_user, get_user, search_users,
    update_user,
};
pub use webhooks::gitea_webhook;
pub use workspaces::{
    delete_my_workspace, get_my_workspace, list_workspaces, provision, restart_my_workspace,
    stop_my_workspace, sync_my_workspace,
};
