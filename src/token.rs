//! # Token Refresh Module
//!
//! Exchanges a refresh token for a new access/refresh pair at the provider's
//! OAuth token endpoint.
//!
//! ## Request
//! - `POST <token_url>`
//! - `Authorization: Basic base64(client_id:client_secret)`
//! - form body `grant_type=refresh_token&refresh_token=<token>`
//!
//! A refresh only counts when the response carries both tokens. Failures are
//! logged and reported as `None` so a poll cycle degrades instead of
//! aborting the scheduler. Persisting the new pair is the caller's job.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use crate::credentials::TokenPair;
use crate::error::RefreshError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// `Basic` authorization value for the OAuth client
pub fn basic_auth_header(client_id: &str, client_secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", client_id, client_secret)))
}

#[derive(Clone)]
pub struct TokenRefresher {
    client: reqwest::Client,
    token_url: String,
}

impl TokenRefresher {
    pub fn new(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }

    /// New token pair, or `None` if the exchange failed for any reason
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Option<TokenPair> {
        match self.exchange(refresh_token, client_id, client_secret).await {
            Ok(pair) => {
                log::info!("Access token refresh succeeded");
                Some(pair)
            }
            Err(e) => {
                log::error!("Access token refresh failed: {}", e);
                None
            }
        }
    }

    async fn exchange(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenPair, RefreshError> {
        let response = self
            .client
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, basic_auth_header(client_id, client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(RefreshError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(RefreshError::Transport)?;
        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| RefreshError::Malformed(e.to_string()))?;
        match (parsed.access_token, parsed.refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                Ok(TokenPair {
                    access_token,
                    refresh_token,
                })
            }
            _ => Err(RefreshError::IncompletePair),
        }
    }
}
