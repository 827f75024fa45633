//! Unified error types for the forgeplane API
//!
//! This module defines error types for each layer:
//! - `DirectoryError`: LDAP directory and pool errors
//! - `GiteaError`: Gitea API client errors
//! - `ClusterError`: Kubernetes client errors
//! - `AuthError`: identity extraction and token errors
//! - `ApiError`: application layer errors (wraps the others for HTTP responses)

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Directory layer errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Schema violation: {0}")]
    Schema(String),

    #[error("Invalid argument: {0}")]
    Invalid(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Directory operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Directory protocol error: {0}")]
    Protocol(#[from] ldap3::LdapError),
}

/// Gitea API client errors
#[derive(Debug, Error)]
pub enum GiteaError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Repository not found: {owner}/{repo}")]
    RepoNotFound { owner: String, repo: String },

    #[error("Organization not found: {0}")]
    OrgNotFound(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Unauthorized - invalid token")]
    Unauthorized,

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl GiteaError {
    /// True for errors a retry is likely to clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GiteaError::Request(_)
                | GiteaError::RateLimited
                | GiteaError::Api { status: 500..=599, .. }
        )
    }
}

/// Kubernetes client errors
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes request failed: {0}")]
    Request(#[from] kube::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Exec in pod failed: {0}")]
    Exec(String),

    #[error("Invalid resource spec: {0}")]
    Spec(String),

    #[error("Mesh route client unavailable")]
    RouteUnavailable,
}

/// Identity and token errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No identity on request")]
    Missing,

    #[error("Malformed identity token: {0}")]
    Malformed(String),

    #[error("Token endpoint error: {0}")]
    TokenEndpoint(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Application layer errors - used by HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    Denied(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Fatal(String),

    #[error("{0}")]
    Directory(#[from] DirectoryError),

    #[error("Git server error: {0}")]
    Gitea(#[from] GiteaError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("{0}")]
    Auth(#[from] AuthError),
}

/// Error response body for JSON responses
///
/// `error` is a short machine-readable kind; `message` is for humans.
/// Credentials and tokens are never echoed here.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ApiError {
    /// Map to (HTTP status, machine kind, human message).
    fn parts(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            ApiError::Denied(msg) => (StatusCode::FORBIDDEN, "denied", Some(msg.clone())),
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated", None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not-found", Some(msg.clone())),
            ApiError::AlreadyExists(msg) => {
                (StatusCode::CONFLICT, "already-exists", Some(msg.clone()))
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            ApiError::Invalid(msg) => (StatusCode::BAD_REQUEST, "invalid", Some(msg.clone())),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                Some(msg.clone()),
            ),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", Some(msg.clone())),
            ApiError::Fatal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "fatal", None)
            }
            ApiError::Directory(e) => match e {
                DirectoryError::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "not-found", Some(msg.clone()))
                }
                DirectoryError::AlreadyExists(msg) => {
                    (StatusCode::CONFLICT, "already-exists", Some(msg.clone()))
                }
                DirectoryError::Schema(msg) => {
                    tracing::error!(error = %msg, "Directory schema violation");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "schema",
                        Some(msg.clone()),
                    )
                }
                DirectoryError::Invalid(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid", Some(msg.clone()))
                }
                DirectoryError::PoolExhausted => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    Some("directory pool exhausted".to_string()),
                ),
                DirectoryError::PoolClosed => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    Some("directory pool closed".to_string()),
                ),
                DirectoryError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout", None),
                DirectoryError::Cancelled => (StatusCode::BAD_REQUEST, "cancelled", None),
                DirectoryError::Protocol(e) => {
                    tracing::error!(error = %e, "Directory protocol error");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "unavailable",
                        Some("directory error".to_string()),
                    )
                }
            },
            ApiError::Gitea(e) => {
                tracing::error!(error = %e, "Gitea error");
                match e {
                    GiteaError::UserNotFound(_)
                    | GiteaError::RepoNotFound { .. }
                    | GiteaError::OrgNotFound(_) => {
                        (StatusCode::NOT_FOUND, "not-found", Some(e.to_string()))
                    }
                    GiteaError::Api {
                        status: 409 | 422,
                        message,
                    } => (StatusCode::CONFLICT, "conflict", Some(message.clone())),
                    _ => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "unavailable",
                        Some("git server error".to_string()),
                    ),
                }
            }
            ApiError::Cluster(e) => {
                tracing::error!(error = %e, "Cluster error");
                match e {
                    ClusterError::NotFound(msg) => {
                        (StatusCode::NOT_FOUND, "not-found", Some(msg.clone()))
                    }
                    _ => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "unavailable",
                        Some("cluster error".to_string()),
                    ),
                }
            }
            ApiError::Auth(e) => match e {
                AuthError::Missing => (StatusCode::UNAUTHORIZED, "unauthenticated", None),
                AuthError::Malformed(msg) => (
                    StatusCode::UNAUTHORIZED,
                    "unauthenticated",
                    Some(msg.clone()),
                ),
                _ => {
                    tracing::error!(error = %e, "Identity provider error");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "unavailable",
                        Some("identity provider error".to_string()),
                    )
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        let body = Json(ErrorResponse { error, message });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_maps_to_403() {
        let (status, kind, _) = ApiError::Denied("no access to acme/api".into()).parts();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(kind, "denied");
    }

    #[test]
    fn pool_exhausted_maps_to_503() {
        let (status, kind, _) = ApiError::Directory(DirectoryError::PoolExhausted).parts();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(kind, "unavailable");
    }

    #[test]
    fn directory_not_found_maps_to_404() {
        let (status, kind, _) =
            ApiError::Directory(DirectoryError::NotFound("uid=nobody".into())).parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(kind, "not-found");
    }

    #[test]
    fn gitea_conflict_maps_to_409() {
        let err = ApiError::Gitea(GiteaError::Api {
            status: 422,
            message: "repo exists".into(),
        });
        let (status, kind, _) = err.parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(kind, "conflict");
    }

    #[test]
    fn timeout_maps_to_504() {
        let (status, kind, _) = ApiError::Timeout("reconcile tick".into()).parts();
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(kind, "timeout");
    }

    #[test]
    fn transient_gitea_errors() {
        assert!(GiteaError::RateLimited.is_transient());
        assert!(GiteaError::Api {
            status: 502,
            message: String::new()
        }
        .is_transient());
        assert!(!GiteaError::Api {
            status: 404,
            message: String::new()
        }
        .is_transient());
        assert!(!GiteaError::Unauthorized.is_transient());
    }
}
