//! Postbox HTTP API
//!
//! - `GET /start`, `GET /stop` control the dispatcher
//! - `GET /messages` lists sent messages, `POST /messages` enqueues one
//! - `GET /messages/{id}` shows a message with its provider id
//! - `GET /status`, `GET /health`, `GET /metrics` for monitoring

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use pb_common::{DispatchState, Message, NewMessage};
use pb_outbox::{DeliveryCache, DispatchController, DispatchError, MessageStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<DispatchController>,
    pub store: Arc<dyn MessageStore>,
    pub cache: Arc<dyn DeliveryCache>,
    pub metrics: PrometheusHandle,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Dispatch(e) => {
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub recipient: String,
    pub content: String,
}

/// A message plus the provider id recorded at delivery, if any
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub message: Message,
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub state: DispatchState,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/start", get(start_handler))
        .route("/stop", get(stop_handler))
        .route("/messages", get(list_sent_handler).post(create_message_handler))
        .route("/messages/{id}", get(get_message_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn start_handler(State(state): State<AppState>) -> &'static str {
    if !state.controller.start() {
        info!("Start requested while already running");
    }
    "started"
}

async fn stop_handler(State(state): State<AppState>) -> &'static str {
    state.controller.stop();
    "stopped"
}

async fn list_sent_handler(State(state): State<AppState>) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.store.fetch_sent().await?))
}

async fn create_message_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    if req.recipient.trim().is_empty() {
        return Err(ApiError::BadRequest("recipient is required".to_string()));
    }

    let message = state
        .store
        .insert(NewMessage::new(req.recipient, req.content))
        .await?;
    info!(message_id = message.id, "Message enqueued");

    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_message_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageDetail>, ApiError> {
    let message = state
        .store
        .find(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("message {} not found", id)))?;
    let provider_message_id = state.cache.lookup(id).await?;

    Ok(Json(MessageDetail {
        message,
        provider_message_id,
    }))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let current = state.controller.state();
    Json(StatusResponse {
        running: current.is_running(),
        state: current,
    })
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use pb_common::{DeliveryRecord, WebhookPayload, WebhookResponse};
    use pb_outbox::{
        DispatchLoop, InMemoryDeliveryCache, InMemoryMessageStore, LoopConfig, WebhookClient,
    };
    use std::time::Duration;
    use tower::ServiceExt;

    struct NoopWebhook;

    #[async_trait]
    impl WebhookClient for NoopWebhook {
        async fn send(&self, _payload: &WebhookPayload) -> pb_outbox::Result<WebhookResponse> {
            Ok(WebhookResponse::default())
        }
    }

    struct DownStore;

    #[async_trait]
    impl MessageStore for DownStore {
        async fn insert(&self, _message: NewMessage) -> pb_outbox::Result<Message> {
            Err(DispatchError::Update("connection refused".to_string()))
        }
        async fn fetch_unsent(&self, _limit: u32) -> pb_outbox::Result<Vec<Message>> {
            Err(DispatchError::Query("connection refused".to_string()))
        }
        async fn fetch_sent(&self) -> pb_outbox::Result<Vec<Message>> {
            Err(DispatchError::Query("connection refused".to_string()))
        }
        async fn find(&self, _id: i64) -> pb_outbox::Result<Option<Message>> {
            Err(DispatchError::Query("connection refused".to_string()))
        }
        async fn mark_sent(&self, _id: i64) -> pb_outbox::Result<()> {
            Err(DispatchError::Update("connection refused".to_string()))
        }
    }

    fn state_with(store: Arc<dyn MessageStore>, cache: Arc<InMemoryDeliveryCache>) -> AppState {
        let dispatch_loop = DispatchLoop::new(
            store.clone(),
            cache.clone(),
            Arc::new(NoopWebhook),
            LoopConfig {
                poll_interval: Duration::from_secs(3600),
                ..Default::default()
            },
        );
        AppState {
            controller: Arc::new(DispatchController::new(dispatch_loop)),
            store,
            cache,
            metrics: PrometheusBuilder::new().build_recorder().handle(),
        }
    }

    fn memory_state() -> AppState {
        state_with(
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(InMemoryDeliveryCache::new()),
        )
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_start_and_stop_toggle_status() {
        let state = memory_state();
        let app = create_router(state.clone());

        let (status, body) = call(app.clone(), "GET", "/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"started");

        let (_, body) = call(app.clone(), "GET", "/status", None).await;
        let parsed: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert!(parsed.running);
        assert_eq!(parsed.state, DispatchState::Running);

        let (status, body) = call(app.clone(), "GET", "/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"stopped");
        assert!(!state.controller.is_running());

        let (_, body) = call(app, "GET", "/status", None).await;
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, serde_json::json!({"running": false, "state": "IDLE"}));

        state.controller.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_repeated_start_is_idempotent() {
        let state = memory_state();
        let app = create_router(state.clone());

        for _ in 0..3 {
            let (status, _) = call(app.clone(), "GET", "/start", None).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert!(state.controller.is_running());

        assert_eq!(
            state.controller.shutdown(Duration::from_secs(1)).await,
            Some(pb_outbox::LoopExit::Stopped)
        );
    }

    #[tokio::test]
    async fn test_create_and_list_messages() {
        let state = memory_state();
        let app = create_router(state.clone());

        let (status, body) = call(
            app.clone(),
            "POST",
            "/messages",
            Some(serde_json::json!({"recipient": "a@b.com", "content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let created: Message = serde_json::from_slice(&body).unwrap();
        assert_eq!(created.id, 1);
        assert!(!created.sent);

        let (_, body) = call(app.clone(), "GET", "/messages", None).await;
        let listed: Vec<Message> = serde_json::from_slice(&body).unwrap();
        assert!(listed.is_empty());

        state.store.mark_sent(1).await.unwrap();

        let (status, body) = call(app, "GET", "/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<Message> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].recipient, "a@b.com");
    }

    #[tokio::test]
    async fn test_create_message_requires_recipient() {
        let app = create_router(memory_state());

        let (status, body) = call(
            app,
            "POST",
            "/messages",
            Some(serde_json::json!({"recipient": "  ", "content": "hi"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.error, "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_message_detail_includes_provider_id() {
        let cache = Arc::new(InMemoryDeliveryCache::new());
        let state = state_with(Arc::new(InMemoryMessageStore::new()), cache.clone());
        let app = create_router(state.clone());

        state.store.insert(NewMessage::new("a@b.com", "hi")).await.unwrap();
        cache.record(&DeliveryRecord::new(1, "abc")).await.unwrap();

        let (status, body) = call(app.clone(), "GET", "/messages/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let detail: MessageDetail = serde_json::from_slice(&body).unwrap();
        assert_eq!(detail.message.id, 1);
        assert_eq!(detail.provider_message_id.as_deref(), Some("abc"));

        let (status, _) = call(app, "GET", "/messages/99", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let app = create_router(state_with(
            Arc::new(DownStore),
            Arc::new(InMemoryDeliveryCache::new()),
        ));

        let (status, body) = call(app, "GET", "/messages", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.error, "INTERNAL_ERROR");
        assert!(err.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = create_router(memory_state());

        let (status, body) = call(app.clone(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, serde_json::json!({"status": "ok"}));

        let (status, _) = call(app, "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
