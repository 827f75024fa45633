//! Group administration handlers
//!
//! Mutations that touch membership or repository sets report cascade
//! results: the triggering write is durable even when individual member
//! updates fail, and failed members are repaired by reconciliation.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{CollabGroup, Group, NewCollabGroup, NewGroup};
use crate::domain::ports::{CascadeReport, DirectoryStore};
use crate::domain::Deadline;
use crate::error::ApiError;
use crate::AppState;

/// Cascade outcome surfaced to admins
#[derive(Debug, Serialize)]
pub struct CascadeResponse {
    /// Members whose repository attribute was rewritten
    pub updated: Vec<String>,
    /// Members the cascade could not update
    pub failed: Vec<CascadeFailure>,
    /// True when every member updated cleanly
    pub complete: bool,
}

#[derive(Debug, Serialize)]
pub struct CascadeFailure {
    pub uid: String,
    pub error: String,
}

impl From<CascadeReport> for CascadeResponse {
    fn from(report: CascadeReport) -> Self {
        let complete = report.is_clean();
        CascadeResponse {
            updated: report.updated,
            failed: report
                .failed
                .into_iter()
                .map(|(uid, error)| CascadeFailure { uid, error })
                .collect(),
            complete,
        }
    }
}

/// POST /groups
pub async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<NewGroup>,
) -> Result<(StatusCode, Json<Group>), ApiError> {
    let group = state.directory.create_group(&request, Deadline::none()).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// GET /groups
pub async fn list_groups(
    State(state): State<AppState>,
) -> Result<Json<Vec<Group>>, ApiError> {
    let groups = state.directory.list_groups(Deadline::none()).await?;
    Ok(Json(groups))
}

/// GET /groups/:cn
pub async fn get_group(
    State(state): State<AppState>,
    Path(cn): Path<String>,
) -> Result<Json<Group>, ApiError> {
    let group = state.directory.get_group(&cn, Deadline::none()).await?;
    Ok(Json(group))
}

/// DELETE /groups/:cn
pub async fn delete_group(
    State(state): State<AppState>,
    Path(cn): Path<String>,
) -> Result<Json<CascadeResponse>, ApiError> {
    let report = state.directory.delete_group(&cn, Deadline::none()).await?;
    Ok(Json(report.into()))
}

/// Request body naming a member
#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub uid: String,
}

/// POST /groups/:cn/members
pub async fn add_member(
    State(state): State<AppState>,
    Path(cn): Path<String>,
    Json(request): Json<MemberRequest>,
) -> Result<Json<CascadeResponse>, ApiError> {
    let report = state
        .directory
        .add_group_member(&cn, &request.uid, Deadline::none())
        .await?;
    Ok(Json(report.into()))
}

/// DELETE /groups/:cn/members/:uid
pub async fn remove_member(
    State(state): State<AppState>,
    Path((cn, uid)): Path<(String, String)>,
) -> Result<Json<CascadeResponse>, ApiError> {
    let report = state
        .directory
        .remove_group_member(&cn, &uid, Deadline::none())
        .await?;
    Ok(Json(report.into()))
}

/// Request body replacing a repository assignment
#[derive(Debug, Deserialize)]
pub struct AssignRepositoriesRequest {
    pub repositories: BTreeSet<String>,
}

/// PUT /groups/:cn/repositories
///
/// Replaces the group's repository set and cascades into every member's
/// effective set.
pub async fn assign_repositories(
    State(state): State<AppState>,
    Path(cn): Path<String>,
    Json(request): Json<AssignRepositoriesRequest>,
) -> Result<Json<CascadeResponse>, ApiError> {
    let report = state
        .directory
        .assign_group_repositories(&cn, &request.repositories, Deadline::none())
        .await?;
    Ok(Json(report.into()))
}

/// POST /groups/collab
pub async fn create_collab_group(
    State(state): State<AppState>,
    Json(request): Json<NewCollabGroup>,
) -> Result<(StatusCode, Json<CollabGroup>), ApiError> {
    let group = state
        .directory
        .create_collab_group(&request, Deadline::none())
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// Resolved collab membership
#[derive(Debug, Serialize)]
pub struct ResolvedMembersResponse {
    pub cn: String,
    pub members: Vec<String>,
}

/// GET /groups/:cn/resolved
///
/// Dynamic membership of a collab group: base-department members plus
/// extra members, computed now.
pub async fn resolve_collab_members(
    State(state): State<AppState>,
    Path(cn): Path<String>,
) -> Result<Json<ResolvedMembersResponse>, ApiError> {
    let members = state
        .directory
        .resolve_collab_members(&cn, Deadline::none())
        .await?;
    Ok(Json(ResolvedMembersResponse { cn, members }))
}
