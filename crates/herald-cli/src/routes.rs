//! HTTP ルート
//!
//! 3 つのリクエスト形をそのまま ScraperQueue の操作に対応させる薄い層。
//! エラーはすべて 500 + `{"detail": "..."}` にする。

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use herald_core::domain::{ChannelMessages, ResolvedChannel};
use herald_core::observability::QueueStats;
use herald_core::ports::PlatformSession;
use herald_core::{HeraldError, ScraperQueue};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct ChannelRequestById {
    pub channel_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ChannelRequestByName {
    pub channel_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelIdRequest {
    pub channel: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub stats: QueueStats,
}

/// A façade error on its way to becoming a 500.
#[derive(Debug)]
pub struct ApiError {
    what: &'static str,
    source: HeraldError,
}

impl ApiError {
    fn messages(source: HeraldError) -> Self {
        Self {
            what: "messages",
            source,
        }
    }

    fn channel_id(source: HeraldError) -> Self {
        Self {
            what: "channel ID",
            source,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.source, kind = ?self.source.kind(), "error getting {}", self.what);
        let body = serde_json::json!({
            "detail": format!("Failed to get {}: {}", self.what, self.source),
        });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

pub fn router<S: PlatformSession>(queue: Arc<ScraperQueue<S>>) -> Router {
    Router::new()
        .route("/messages_by_id", post(messages_by_id::<S>))
        .route("/messages_by_name", post(messages_by_name::<S>))
        .route("/channel_id", post(channel_id::<S>))
        .route("/health", get(health::<S>))
        .with_state(queue)
}

async fn messages_by_id<S: PlatformSession>(
    State(queue): State<Arc<ScraperQueue<S>>>,
    Json(request): Json<ChannelRequestById>,
) -> Result<Json<ChannelMessages>, ApiError> {
    queue
        .fetch_recent_messages_by_id(request.channel_id)
        .await
        .map(Json)
        .map_err(ApiError::messages)
}

async fn messages_by_name<S: PlatformSession>(
    State(queue): State<Arc<ScraperQueue<S>>>,
    Json(request): Json<ChannelRequestByName>,
) -> Result<Json<ChannelMessages>, ApiError> {
    queue
        .fetch_recent_messages_by_name(request.channel_name)
        .await
        .map(Json)
        .map_err(ApiError::messages)
}

async fn channel_id<S: PlatformSession>(
    State(queue): State<Arc<ScraperQueue<S>>>,
    Json(request): Json<ChannelIdRequest>,
) -> Result<Json<ResolvedChannel>, ApiError> {
    queue
        .resolve_channel_id(request.channel)
        .await
        .map(Json)
        .map_err(ApiError::channel_id)
}

async fn health<S: PlatformSession>(
    State(queue): State<Arc<ScraperQueue<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "herald",
        stats: queue.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use herald_core::impls::{ChannelFixture, InMemorySession};
    use herald_core::ports::{Entity, EntityKind};
    use tower::ServiceExt;

    fn app() -> Router {
        let session = InMemorySession::new().with_channel(ChannelFixture::new(Entity {
            id: 123,
            username: Some("news".to_string()),
            kind: EntityKind::Supergroup,
        }));
        router(Arc::new(ScraperQueue::new(session)))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn channel_id_returns_the_normalized_id() {
        let (status, body) = send(
            app(),
            post_json("/channel_id", serde_json::json!({"channel": "@news"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"channel_id": -100123, "username": "news"}));
    }

    #[tokio::test]
    async fn messages_by_name_returns_the_messages_shape() {
        let (status, body) = send(
            app(),
            post_json("/messages_by_name", serde_json::json!({"channel_name": "news"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["channel_id"], "news");
        assert_eq!(body["messages"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn failures_become_500_with_detail() {
        let (status, body) = send(
            app(),
            post_json("/messages_by_id", serde_json::json!({"channel_id": 999})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["detail"],
            "Failed to get messages: cannot find any entity corresponding to \"999\""
        );
    }

    #[tokio::test]
    async fn health_reports_queue_stats() {
        let (status, body) = send(
            app(),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["stats"]["submitted"], 0);
    }
}
