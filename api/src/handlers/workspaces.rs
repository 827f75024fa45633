//! Workspace handlers
//!
//! Workspace operations act on the caller's forwarded identity; the
//! provisioner authorizes every repository against the directory
//! projection before touching the cluster.

use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::domain::Deadline;
use crate::domain::entities::{ProvisionOutcome, Workspace};
use crate::error::ApiError;
use crate::AppState;

/// Request body for provisioning
#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub repository: String,
    pub branch: Option<String>,
    /// Optional bound on waiting for readiness; on expiry the call
    /// returns with status `starting` instead of failing.
    pub wait_seconds: Option<u64>,
}

/// POST /workspaces
pub async fn provision(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<ProvisionRequest>,
) -> Result<Json<ProvisionOutcome>, ApiError> {
    let wait = request.wait_seconds.map(Duration::from_secs);
    let outcome = state
        .workspaces
        .provision(
            &identity.username,
            &request.repository,
            request.branch.as_deref(),
            wait,
            Deadline::none(),
        )
        .await?;
    Ok(Json(outcome))
}

/// GET /workspaces
pub async fn list_workspaces(
    State(state): State<AppState>,
) -> Result<Json<Vec<Workspace>>, ApiError> {
    let workspaces = state.workspaces.list().await?;
    Ok(Json(workspaces))
}

/// GET /workspaces/me
pub async fn get_my_workspace(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Workspace>, ApiError> {
    let workspace = state.workspaces.get(&identity.username).await?;
    Ok(Json(workspace))
}

/// POST /workspaces/me/stop
///
/// Removes the pod only; the volume and user data survive.
pub async fn stop_my_workspace(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<StatusCode, ApiError> {
    state.workspaces.stop(&identity.username).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /workspaces/me/restart
pub async fn restart_my_workspace(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ProvisionOutcome>, ApiError> {
    let outcome = state
        .workspaces
        .restart(&identity.username, Deadline::none())
        .await?;
    Ok(Json(outcome))
}

/// Output of a checkout sync
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub output: String,
}

/// POST /workspaces/me/sync
///
/// Fetch + fast-forward inside the running pod's checkout.
pub async fn sync_my_workspace(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<SyncResponse>, ApiError> {
    let output = state.workspaces.sync_repo(&identity.username).await?;
    Ok(Json(SyncResponse { output }))
}

/// DELETE /workspaces/me
///
/// Removes pod, route, service and volume; user data is irrecoverable.
pub async fn delete_my_workspace(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<StatusCode, ApiError> {
    state.workspaces.delete(&identity.username).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_provision_request() {
        let json = r#"{"repository": "acme/api", "branch": "develop", "wait_seconds": 30}"#;
        let request: ProvisionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.repository, "acme/api");
        assert_eq!(request.branch.as_deref(), Some("develop"));
        assert_eq!(request.wait_seconds, Some(30));
    }

    #[test]
    fn provision_request_defaults() {
        let request: ProvisionRequest =
            serde_json::from_str(r#"{"repository": "acme/api"}"#).unwrap();
        assert!(request.branch.is_none());
        assert!(request.wait_seconds.is_none());
    }
}
