//! Repository administration handlers
//!
//! All managed repositories live under the centralized owner org;
//! per-user access is mediated by directory-derived teams, never by
//! repository ownership.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::domain::ports::{GiteaBranch, GiteaClient, GiteaRepo, MigrationService};
use crate::error::ApiError;
use crate::AppState;

/// Request body for repository creation
#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_private")]
    pub private: bool,
}

fn default_private() -> bool {
    true
}

/// POST /repos
pub async fn create_repo(
    State(state): State<AppState>,
    Json(request): Json<CreateRepoRequest>,
) -> Result<(StatusCode, Json<GiteaRepo>), ApiError> {
    let repo = state
        .gitea
        .create_org_repo(
            &state.config.default_owner,
            &request.name,
            request.description.as_deref(),
            request.private,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(repo)))
}

/// GET /repos
pub async fn list_repos(State(state): State<AppState>) -> Result<Json<Vec<GiteaRepo>>, ApiError> {
    let repos = state
        .gitea
        .list_org_repos(&state.config.default_owner)
        .await?;
    Ok(Json(repos))
}

/// GET /repos/:name
pub async fn get_repo(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<GiteaRepo>, ApiError> {
    let repo = state
        .gitea
        .get_repo(&state.config.default_owner, &name)
        .await?;
    Ok(Json(repo))
}

/// DELETE /repos/:name
pub async fn delete_repo(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .gitea
        .delete_repo(&state.config.default_owner, &name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for forking into the owner org
#[derive(Debug, Deserialize)]
pub struct ForkRepoRequest {
    pub owner: String,
    pub repo: String,
}

/// POST /repos/fork
pub async fn fork_repo(
    State(state): State<AppState>,
    Json(request): Json<ForkRepoRequest>,
) -> Result<(StatusCode, Json<GiteaRepo>), ApiError> {
    let forked = state
        .gitea
        .fork_repo(&request.owner, &request.repo, &state.config.default_owner)
        .await?;
    Ok((StatusCode::CREATED, Json(forked)))
}

/// Request body for migrating an external repository
#[derive(Debug, Deserialize)]
pub struct MigrateRepoRequest {
    pub clone_addr: String,
    pub name: String,
    pub service: MigrationService,
    #[serde(default)]
    pub mirror: bool,
}

/// POST /repos/migrate
///
/// Mirror scheduling afterwards is Gitea's own concern.
pub async fn migrate_repo(
    State(state): State<AppState>,
    Json(request): Json<MigrateRepoRequest>,
) -> Result<(StatusCode, Json<GiteaRepo>), ApiError> {
    let repo = state
        .gitea
        .migrate_repo(
            &request.clone_addr,
            &state.config.default_owner,
            &request.name,
            request.service,
            request.mirror,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(repo)))
}

/// GET /repos/:name/branches
pub async fn list_branches(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<GiteaBranch>>, ApiError> {
    let branches = state
        .gitea
        .list_branches(&state.config.default_owner, &name)
        .await?;
    Ok(Json(branches))
}

/// Request body for branch creation
#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub new_branch: String,
    pub old_ref: Option<String>,
}

/// POST /repos/:name/branches
pub async fn create_branch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<CreateBranchRequest>,
) -> Result<(StatusCode, Json<GiteaBranch>), ApiError> {
    let branch = state
        .gitea
        .create_branch(
            &state.config.default_owner,
            &name,
            &request.new_branch,
            request.old_ref.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(branch)))
}

/// DELETE /repos/:name/branches/:branch
pub async fn delete_branch(
    State(state): State<AppState>,
    Path((name, branch)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .gitea
        .delete_branch(&state.config.default_owner, &name, &branch)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
