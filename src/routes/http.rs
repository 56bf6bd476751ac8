//! HTTP endpoint handlers. Read-only views; gameplay goes through the WebSocket.

use std::sync::Arc;
use axum::{extract::{State, Query}, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::domain::{profile_for, Difficulty};
use crate::protocol::*;
use crate::scores::LEADERBOARD_CAPACITY;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info")]
pub async fn http_get_difficulties() -> impl IntoResponse {
  Json(DifficultiesOut { difficulties: Difficulty::ALL.iter().map(|d| profile_for(*d)).collect() })
}

#[instrument(level = "info", skip(state), fields(limit = ?q.limit))]
pub async fn http_get_leaderboard(
  State(state): State<Arc<AppState>>,
  Query(q): Query<LeaderboardQuery>,
) -> impl IntoResponse {
  let limit = q.limit.unwrap_or(state.config.leaderboard_size).min(LEADERBOARD_CAPACITY);
  let entries = state.leaderboard.top(limit).await;
  info!(target: "scores", limit, returned = entries.len(), "HTTP leaderboard served");
  Json(LeaderboardOut { entries })
}
