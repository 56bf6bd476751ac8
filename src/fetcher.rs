//! Remote question retrieval.
//!
//! One call = one HTTP GET against the question API, no retry and no cache.
//! The future is cancel-safe: dropping it (or aborting the task that drives it)
//! abandons the request. The engine decides what to do with failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
  header::{ACCEPT, USER_AGENT},
  StatusCode,
};
use tracing::{debug, error, instrument};

use crate::domain::Question;
use crate::util::trunc_for_log;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  #[error("could not reach question API: {0}")]
  Transport(String),

  #[error("question API returned HTTP {0}")]
  Status(u16),

  #[error("malformed question payload: {0}")]
  Decode(String),
}

/// Source of fresh questions, one per round.
#[async_trait]
pub trait RoundFetcher: Send + Sync {
  async fn fetch(&self) -> Result<Question, FetchError>;
}

/// HTTP client for the heart/carrot counting API.
#[derive(Clone)]
pub struct HeartApi {
  client: reqwest::Client,
  pub url: String,
}

impl HeartApi {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| FetchError::Transport(e.to_string()))?;
    Ok(Self { client, url: url.into() })
  }
}

#[async_trait]
impl RoundFetcher for HeartApi {
  #[instrument(level = "debug", skip(self), fields(url = %self.url))]
  async fn fetch(&self) -> Result<Question, FetchError> {
    let start = std::time::Instant::now();
    let res = self.client.get(&self.url)
      .header(USER_AGENT, "heartcount-backend/0.1")
      .header(ACCEPT, "application/json")
      .send().await
      .map_err(|e| {
        error!(target: "fetch", error = %e, "Question request failed");
        FetchError::Transport(e.to_string())
      })?;

    let status = res.status();
    if status != StatusCode::OK {
      let body = res.text().await.unwrap_or_default();
      error!(target: "fetch", %status, body = %trunc_for_log(&body, 200), "Question API returned an error status");
      return Err(FetchError::Status(status.as_u16()));
    }

    let body = res.text().await.map_err(|e| FetchError::Transport(e.to_string()))?;
    let q = serde_json::from_str::<Question>(&body).map_err(|e| {
      error!(target: "fetch", error = %e, body = %trunc_for_log(&body, 200), "Question payload did not decode");
      FetchError::Decode(e.to_string())
    })?;

    debug!(target: "fetch", elapsed = ?start.elapsed(), hearts = q.hearts, carrots = q.carrots, "Question received");
    Ok(q)
  }
}
