//! Token acquisition against the configured OAuth2 client-credentials
//! endpoint. Treated as an external collaborator: this module only knows
//! how to ask for a bearer token, not how the identity provider is run.

use reqwest::Client;
use serde::Deserialize;

use crate::utils::errors::{AgentError, Result};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchange `client_id`/`secret` for a bearer token via the client
/// credentials grant at `token_url`.
pub async fn authenticate(
    http: &Client,
    token_url: &str,
    client_id: &str,
    secret: &str,
) -> Result<String> {
    let response = http
        .post(token_url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", secret),
        ])
        .send()
        .await
        .map_err(|e| AgentError::Authentication(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AgentError::Authentication(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AgentError::Authentication(format!("malformed token response: {e}")))?;

    Ok(token.access_token)
}
