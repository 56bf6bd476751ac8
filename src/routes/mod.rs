//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket game sessions at `/ws`
/// - read-only API under `/api/v1/...`
/// - optional static client from `./static` with index fallback
/// - CORS (allow any origin/method/headers) and per-request trace spans
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/difficulties", get(http::http_get_difficulties))
        .route("/api/v1/leaderboard", get(http::http_get_leaderboard))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .fallback_service(static_service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::domain::{Difficulty, Question};
    use crate::fetcher::{FetchError, RoundFetcher};
    use crate::scores::ScoreSink;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    struct Offline;

    #[async_trait]
    impl RoundFetcher for Offline {
        async fn fetch(&self) -> Result<Question, FetchError> {
            Err(FetchError::Transport("offline".into()))
        }
    }

    fn state() -> Arc<AppState> {
        Arc::new(AppState::with_fetcher(GameConfig::default(), Arc::new(Offline)))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let res = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = get_json(build_router(state()), "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn difficulties_lists_all_three_profiles() {
        let (status, body) = get_json(build_router(state()), "/api/v1/difficulties").await;
        assert_eq!(status, StatusCode::OK);
        let list = body["difficulties"].as_array().expect("array");
        assert_eq!(list.len(), 3);
        assert_eq!(list[1]["id"], "medium");
        assert_eq!(list[1]["timer_seconds"], 30);
        assert_eq!(list[2]["points_per_correct"], 5);
    }

    #[tokio::test]
    async fn leaderboard_respects_limit() {
        let st = state();
        st.leaderboard.save_score("ann", 12, Difficulty::Hard).await.expect("save");
        st.leaderboard.save_score("bob", 30, Difficulty::Easy).await.expect("save");
        st.leaderboard.save_score("cy", 2, Difficulty::Medium).await.expect("save");

        let (status, body) = get_json(build_router(st), "/api/v1/leaderboard?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let entries = body["entries"].as_array().expect("array");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["player"], "bob");
        assert_eq!(entries[1]["score"], 12);
    }
}
