//! Upstream identity extraction
//!
//! Token validation is delegated to the ingress policy; its verified
//! claims arrive as `X-Forwarded-User` / `X-Forwarded-Email` /
//! `X-JWT-Payload` headers. When those are absent, the bearer token's
//! claims segment is parsed for the same fields (without re-validating
//! the signature, which already happened upstream).

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

use crate::error::{ApiError, AuthError};

/// The caller's identity as asserted by the ingress
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub email: Option<String>,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl Claims {
    fn into_identity(self) -> Result<Identity, AuthError> {
        let username = self
            .preferred_username
            .or(self.sub)
            .ok_or_else(|| AuthError::Malformed("token carries no username claim".to_string()))?;
        Ok(Identity {
            username,
            email: self.email,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn decode_claims(segment: &str) -> Result<Claims, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .or_else(|_| STANDARD_NO_PAD.decode(segment.trim_end_matches('=')))
        .map_err(|e| AuthError::Malformed(format!("claims segment: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed(format!("claims JSON: {}", e)))
}

/// Resolve the request identity from upstream headers, falling back to
/// the bearer token's claims segment.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, AuthError> {
    if let Some(username) = header_str(headers, "X-Forwarded-User") {
        if !username.is_empty() {
            return Ok(Identity {
                username: username.to_string(),
                email: header_str(headers, "X-Forwarded-Email").map(|s| s.to_string()),
            });
        }
    }

    if let Some(payload) = header_str(headers, "X-JWT-Payload") {
        return decode_claims(payload)?.into_identity();
    }

    if let Some(auth) = header_str(headers, "Authorization") {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let segment = token
                .split('.')
                .nth(1)
                .ok_or_else(|| AuthError::Malformed("token is not a JWT".to_string()))?;
            return decode_claims(segment)?.into_identity();
        }
    }

    Err(AuthError::Missing)
}

/// Identity middleware
///
/// Resolves the caller identity and injects it into request extensions.
/// Routes behind this middleware can rely on `Extension<Identity>`.
pub async fn identity_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = identity_from_headers(request.headers())?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
