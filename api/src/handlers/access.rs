//! Access projection handlers
//!
//! Read-only views over the access projector. No cache sits behind
//! these: revocations in the directory are visible immediately.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::Deadline;
use crate::error::ApiError;
use crate::AppState;

/// A user's projected repository set
#[derive(Debug, Serialize)]
pub struct ProjectionResponse {
    pub uid: String,
    pub repositories: Vec<String>,
}

/// GET /access/:uid
pub async fn get_projection(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ProjectionResponse>, ApiError> {
    let repositories = state
        .access
        .effective_repositories(&uid, Deadline::none())
        .await?
        .iter()
        .map(|r| r.full_name())
        .collect();
    Ok(Json(ProjectionResponse { uid, repositories }))
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub repository: String,
}

/// Authorization decision for a single ref
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub uid: String,
    pub repository: String,
    pub allowed: bool,
}

/// GET /access/:uid/check?repository=owner/name
pub async fn check_access(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, ApiError> {
    let allowed = state
        .access
        .authorize(&uid, &query.repository, Deadline::none())
        .await?;
    Ok(Json(CheckResponse {
        uid,
        repository: query.repository,
        allowed,
    }))
}
