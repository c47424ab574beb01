//! # Sample Fetcher Module
//!
//! Downloads today's intraday heart-rate series from the provider.
//!
//! ## Endpoint
//! `GET {api_base}/1/user/{user_id}/activities/heart/date/{YYYY-MM-DD}/1d/1sec.json`
//! with the access token as bearer. The samples live under
//! `activities-heart-intraday.dataset` as `{ "time": "HH:MM:SS", "value": bpm }`.
//!
//! ## Expired tokens
//! A 401 triggers a token refresh and the new pair is merged into the
//! credential store. By default the request is not repeated: the cycle ends
//! with `FetchError::Unauthorized` and the next cycle picks the new token up.
//! With `retry_after_refresh` the request is retried once with the new token.

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use crate::credentials::{CredentialRecord, CredentialStore, CredentialUpdate};
use crate::error::FetchError;
use crate::timeseries::RawSample;
use crate::token::TokenRefresher;

#[derive(Debug, Deserialize)]
struct HeartRateResponse {
    #[serde(rename = "activities-heart-intraday")]
    intraday: Option<IntradaySeries>,
}

#[derive(Debug, Deserialize)]
struct IntradaySeries {
    #[serde(default)]
    dataset: Vec<RawSample>,
}

/// HTTP client shared by the token and data requests; `timeout` bounds each
/// request from connect until the body is read
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Parse a heart-rate response body; a missing intraday block means no data
pub fn parse_dataset(body: &str) -> Result<Vec<RawSample>, FetchError> {
    let response: HeartRateResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    Ok(response.intraday.map(|series| series.dataset).unwrap_or_default())
}

pub struct SampleFetcher {
    client: reqwest::Client,
    api_base: String,
    user_id: String,
    refresher: TokenRefresher,
    retry_after_refresh: bool,
}

/// Result of a single request
enum Attempt {
    Samples(Vec<RawSample>),
    Unauthorized,
}

impl SampleFetcher {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        user_id: impl Into<String>,
        refresher: TokenRefresher,
        retry_after_refresh: bool,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            user_id: user_id.into(),
            refresher,
            retry_after_refresh,
        }
    }

    pub fn heart_rate_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/1/user/{}/activities/heart/date/{}/1d/1sec.json",
            self.api_base.trim_end_matches('/'),
            self.user_id,
            date.format("%Y-%m-%d")
        )
    }

    /// Fetch the samples recorded on `date`.
    ///
    /// `credentials` is the snapshot read at the start of the cycle. Rotated
    /// tokens go to `store`; the snapshot itself is never modified.
    pub async fn fetch_today(
        &self,
        credentials: &CredentialRecord,
        store: &dyn CredentialStore,
        date: NaiveDate,
    ) -> Result<Vec<RawSample>, FetchError> {
        let url = self.heart_rate_url(date);

        match self.attempt(&url, &credentials.access_token).await? {
            Attempt::Samples(samples) => return Ok(samples),
            Attempt::Unauthorized => {
                log::warn!("Access token expired. Refreshing...");
            }
        }

        let Some(tokens) = self
            .refresher
            .refresh(
                &credentials.refresh_token,
                &credentials.client_id,
                &credentials.client_secret,
            )
            .await
        else {
            return Err(FetchError::Unauthorized { refreshed: false });
        };

        let rotated = store
            .merge(CredentialUpdate::tokens(tokens))
            .await
            .map_err(FetchError::Store)?;
        log::info!("Stored refreshed token pair");

        if !self.retry_after_refresh {
            return Err(FetchError::Unauthorized { refreshed: true });
        }

        match self.attempt(&url, &rotated.access_token).await? {
            Attempt::Samples(samples) => Ok(samples),
            Attempt::Unauthorized => Err(FetchError::Unauthorized { refreshed: true }),
        }
    }

    async fn attempt(&self, url: &str, access_token: &str) -> Result<Attempt, FetchError> {
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Ok(Attempt::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(FetchError::Transport)?;
        let samples = parse_dataset(&body)?;
        log::debug!("Fetched {} heart rate samples", samples.len());
        Ok(Attempt::Samples(samples))
    }
}
