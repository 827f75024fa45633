//! Machine-to-machine token acquisition
//!
//! Client-credentials grant against the identity provider. The
//! reconciliation controller mints a fresh token per tick; no refresh
//! bookkeeping is kept here.

use reqwest::Client;
use serde::Deserialize;

use crate::error::AuthError;

/// OAuth2 client-credentials client
pub struct TokenClient {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl TokenClient {
    pub fn new(token_url: String, client_id: String, client_secret: String) -> Self {
        TokenClient {
            http: Client::new(),
            token_url,
            client_id,
            client_secret,
        }
    }

    /// Fetch an access token for this controller.
    pub async fn client_credentials_token(&self) -> Result<String, AuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint(format!(
                "{}: {}",
                status,
                // The provider's error body never includes our secret.
                body
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?;
        Ok(token.access_token)
    }
}
