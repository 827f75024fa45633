//! Webhook handlers
//!
//! Signed ingress for Gitea repository events. Payloads are
//! authenticated by HMAC-SHA256 over the raw body with the shared
//! secret; comparison happens in constant time inside `Mac::verify_slice`.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::Deadline;
use crate::error::{ApiError, DirectoryError};
use crate::AppState;

/// Deadline for the event-driven per-user sync
const WEBHOOK_SYNC_DEADLINE: Duration = Duration::from_secs(30);

/// Gitea webhook payload (repository events)
#[derive(Debug, Deserialize)]
pub struct GiteaWebhookPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub sender: Option<Sender>,
    #[serde(default)]
    pub repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub owner: Owner,
}

#[derive(Debug, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct Sender {
    pub login: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// Verify the detached HMAC-SHA256 signature over the payload.
fn verify_signature(payload: &[u8], signature: Option<&str>, secret: &Option<String>) -> bool {
    let Some(secret) = secret else {
        // No secret configured, skip verification (development mode)
        tracing::warn!("Webhook secret not configured, skipping signature verification");
        return true;
    };

    let Some(sig_header) = signature else {
        tracing::warn!("No signature provided in webhook request");
        return false;
    };

    let expected_hex = sig_header.strip_prefix("sha256=").unwrap_or(sig_header);

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => {
            tracing::error!("Invalid webhook secret key");
            return false;
        }
    };

    mac.update(payload);

    let expected_bytes = match hex::decode(expected_hex) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("Invalid signature format");
            return false;
        }
    };

    // Constant-time comparison.
    mac.verify_slice(&expected_bytes).is_ok()
}

/// POST /webhook/gitea
///
/// Handle Gitea webhook events. Only `repository` events are acted on;
/// everything else is acknowledged as ignored so Gitea does not mark
/// the hook broken. A failed sync queues the owner for retry and
/// returns 5xx so Gitea redelivers on its own schedule.
pub async fn gitea_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError> {
    counter!("webhook_events_total").increment(1);

    let signature = headers
        .get("X-Gitea-Signature")
        .and_then(|h| h.to_str().ok());

    if !verify_signature(&body, signature, &state.config.webhook_secret) {
        counter!("webhook_invalid_signature_total").increment(1);
        tracing::warn!("Webhook signature verification failed");
        return Err(ApiError::Unauthenticated);
    }

    let event_type = headers
        .get("X-Gitea-Event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown");

    if event_type != "repository" {
        counter!("webhook_ignored_total").increment(1);
        tracing::debug!(event_type = event_type, "Ignoring unhandled event type");
        return Ok((StatusCode::OK, Json(WebhookResponse { status: "ignored" })));
    }

    let payload: GiteaWebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Failed to parse webhook payload");
        ApiError::Invalid(format!("invalid JSON: {}", e))
    })?;

    let Some(repository) = &payload.repository else {
        return Err(ApiError::Invalid(
            "repository event without repository".to_string(),
        ));
    };
    let owner = &repository.owner.login;

    tracing::info!(
        repo = %repository.full_name,
        owner = %owner,
        action = ?payload.action,
        sender = ?payload.sender.as_ref().map(|s| &s.login),
        "Received repository event"
    );

    // The handler's own bound rides into the sync as the caller
    // deadline; the outer timeout is a backstop for hung git-server
    // calls that cannot observe it.
    let deadline = Deadline::after(WEBHOOK_SYNC_DEADLINE);
    match tokio::time::timeout(WEBHOOK_SYNC_DEADLINE, state.sync.sync_user(owner, deadline)).await
    {
        Ok(Ok(())) => Ok((StatusCode::OK, Json(WebhookResponse { status: "synced" }))),
        // Our deadline ran out inside the directory work: that is this
        // handler's own timeout, not a failure of the sync itself.
        Ok(Err(ApiError::Directory(DirectoryError::Cancelled))) => {
            tracing::warn!(owner = %owner, "Webhook sync deadline elapsed in the directory; queueing retry");
            state.sync.enqueue_retry(owner).await;
            Err(ApiError::Timeout(format!("sync timed out for {}", owner)))
        }
        Ok(Err(e)) => {
            // Never silently dropped: the owner goes to the retry queue
            // and Gitea gets a 5xx to redeliver.
            tracing::warn!(owner = %owner, error = %e, "Webhook-driven sync failed; queueing retry");
            state.sync.enqueue_retry(owner).await;
            Err(ApiError::Unavailable(format!("sync failed for {}", owner)))
        }
        Err(_) => {
            tracing::warn!(owner = %owner, "Webhook-driven sync timed out; queueing retry");
            state.sync.enqueue_retry(owner).await;
            Err(ApiError::Timeout(format!("sync timed out for {}", owner)))
        }
    }
}
