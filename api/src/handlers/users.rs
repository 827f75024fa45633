//! User administration handlers

use std::collections::BTreeSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{NewUser, User, UserQuery, UserUpdate};
use crate::domain::ports::DirectoryStore;
use crate::domain::Deadline;
use crate::error::ApiError;
use crate::AppState;

/// POST /users
///
/// Create a directory user. POSIX ids are allocated by the store.
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.directory.create_user(&request, Deadline::none()).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users
///
/// Search users; with no query parameters this lists everyone.
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = state.directory.search_users(&query, Deadline::none()).await?;
    Ok(Json(users))
}

/// GET /users/:uid
pub async fn get_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user = state.directory.get_user(&uid, Deadline::none()).await?;
    Ok(Json(user))
}

/// PATCH /users/:uid
///
/// Each field is independently optional; an empty repository set clears
/// the assignment.
pub async fn update_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<UserUpdate>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .directory
        .update_user(&uid, &request, Deadline::none())
        .await?;
    Ok(Json(user))
}

/// DELETE /users/:uid
pub async fn delete_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.directory.delete_user(&uid, Deadline::none()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for an authentication check
#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub password: String,
}

/// Response body for an authentication check
#[derive(Debug, Serialize)]
pub struct AuthenticateResponse {
    pub authenticated: bool,
}

/// POST /users/:uid/authenticate
///
/// Attempts a fresh bind with the supplied credentials on a dedicated
/// directory session. The password is never echoed back.
pub async fn authenticate_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<AuthenticateRequest>,
) -> Result<Json<AuthenticateResponse>, ApiError> {
    let authenticated = state
        .directory
        .authenticate(&uid, &request.password, Deadline::none())
        .await?;
    Ok(Json(AuthenticateResponse { authenticated }))
}

/// Request body replacing a repository assignment
#[derive(Debug, Deserialize)]
pub struct AssignRepositoriesRequest {
    pub repositories: BTreeSet<String>,
}

/// PUT /users/:uid/repositories
pub async fn assign_user_repositories(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<AssignRepositoriesRequest>,
) -> Result<Json<User>, ApiError> {
    let update = UserUpdate {
        repositories: Some(request.repositories),
        ..Default::default()
    };
    let user = state
        .directory
        .update_user(&uid, &update, Deadline::none())
        .await?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_new_user_request() {
        let json = r#"{
            "uid": "jane.doe",
            "display_name": "Jane Doe",
            "email": "jane@example.org",
            "department": "engineering",
            "repositories": ["acme/api", "acme/frontend"]
        }"#;
        let request: NewUser = serde_json::from_str(json).unwrap();
        assert_eq!(request.uid, "jane.doe");
        assert_eq!(request.repositories.len(), 2);
        assert!(request.password.is_none());
    }

    #[test]
    fn parse_update_distinguishes_clear_from_absent() {
        let absent: UserUpdate = serde_json::from_str(r#"{"email": "j@example.org"}"#).unwrap();
        assert!(absent.repositories.is_none());

        let clear: UserUpdate = serde_json::from_str(r#"{"repositories": []}"#).unwrap();
        assert_eq!(clear.repositories, Some(BTreeSet::new()));
    }

    #[test]
    fn authenticate_response_never_contains_password() {
        let json = serde_json::to_string(&AuthenticateResponse { authenticated: true }).unwrap();
        assert_eq!(json, r#"{"authenticated":true}"#);
    }
}
