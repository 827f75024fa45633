//! Department administration handlers
//!
//! Department membership is derived from user department keys, so
//! repository assignment here never cascades.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{Department, NewDepartment};
use crate::domain::ports::DirectoryStore;
use crate::domain::Deadline;
use crate::error::ApiError;
use crate::AppState;

/// POST /departments
pub async fn create_department(
    State(state): State<AppState>,
    Json(request): Json<NewDepartment>,
) -> Result<(StatusCode, Json<Department>), ApiError> {
    let department = state
        .directory
        .create_department(&request, Deadline::none())
        .await?;
    Ok((StatusCode::CREATED, Json(department)))
}

/// GET /departments
pub async fn list_departments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Department>>, ApiError> {
    let departments = state.directory.list_departments(Deadline::none()).await?;
    Ok(Json(departments))
}

/// GET /departments/:ou
pub async fn get_department(
    State(state): State<AppState>,
    Path(ou): Path<String>,
) -> Result<Json<Department>, ApiError> {
    let department = state.directory.get_department(&ou, Deadline::none()).await?;
    Ok(Json(department))
}

/// DELETE /departments/:ou
pub async fn delete_department(
    State(state): State<AppState>,
    Path(ou): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.directory.delete_department(&ou, Deadline::none()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body replacing a repository assignment
#[derive(Debug, Deserialize)]
pub struct AssignRepositoriesRequest {
    pub repositories: BTreeSet<String>,
}

/// PUT /departments/:ou/repositories
pub async fn assign_repositories(
    State(state): State<AppState>,
    Path(ou): Path<String>,
    Json(request): Json<AssignRepositoriesRequest>,
) -> Result<Json<Department>, ApiError> {
    let department = state
        .directory
        .assign_department_repositories(&ou, &request.repositories, Deadline::none())
        .await?;
    Ok(Json(department))
}

/// Derived membership of a department
#[derive(Debug, Serialize)]
pub struct DepartmentMembersResponse {
    pub ou: String,
    pub members: Vec<String>,
}

/// GET /departments/:ou/members
pub async fn department_members(
    State(state): State<AppState>,
    Path(ou): Path<String>,
) -> Result<Json<DepartmentMembersResponse>, ApiError> {
    // 404 for unknown departments rather than an empty derived list.
    state.directory.get_department(&ou, Deadline::none()).await?;
    let members = state.directory.department_members(&ou, Deadline::none()).await?;
    Ok(Json(DepartmentMembersResponse { ou, members }))
}
