//! HTTP surface consumed by the dashboard UI.

pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::AlertError;
use crate::service::MonitorService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MonitorService>,
}

impl AppState {
    pub fn new(service: MonitorService) -> Self {
        Self { service: Arc::new(service) }
    }
}

/// Handler failure rendered as `{ "error", "message" }`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Alert(#[from] AlertError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Alert(AlertError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Alert(AlertError::InvalidTransition { .. }) => (StatusCode::CONFLICT, "invalid_transition"),
            ApiError::Alert(AlertError::Validation(_)) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Alert(AlertError::UnsupportedFormat(_)) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let mut body = json!({ "error": kind, "message": self.to_string() });
        if let ApiError::Alert(AlertError::Validation(problems)) = &self {
            body["details"] = json!(problems);
        }
        (status, Json(body)).into_response()
    }
}

/// JSON request body. An absent or blank body yields `T::default()`; anything
/// else must deserialize or the request is rejected as `bad_request`.
#[derive(Debug, Clone, Default)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        parse_body(&bytes).map(JsonBody)
    }
}

fn parse_body<T: DeserializeOwned + Default>(bytes: &[u8]) -> Result<T, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest(format!("malformed JSON body: {}", e)))
}

/// Liveness check
async fn liveness() -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub fn router(state: AppState) -> Router {
    let cors_permissive = state.service.config().server.cors_permissive;

    let app = Router::new()
        .route("/health/live", get(liveness))
        .route("/ws", get(ws::alert_feed))
        .route("/api/energy/simulate", post(routes::simulate))
        .route("/api/dashboard/summary", get(routes::dashboard_summary))
        .route("/api/ai/insights", get(routes::ai_insights))
        .route("/api/system/initialize", post(routes::initialize))
        .route("/api/alerts", get(routes::list_alerts).post(routes::create_alert))
        .route("/api/alerts/stats", get(routes::alert_stats))
        .route("/api/alerts/export", get(routes::export_alerts))
        .route("/api/alerts/rules", get(routes::list_rules))
        .route("/api/alerts/manual", post(routes::create_alert))
        .route("/api/alerts/test-detection", post(routes::test_detection))
        .route("/api/alerts/:id", get(routes::get_alert))
        .route("/api/alerts/:id/acknowledge", post(routes::acknowledge))
        .route("/api/alerts/:id/resolve", post(routes::resolve))
        .route("/api/alerts/:id/dismiss", post(routes::dismiss))
        .route("/api/alerts/:id/notes", post(routes::add_notes))
        .route("/api/alerts/:id/interactions", get(routes::interactions))
        .route("/api/alerts/:id/notifications", get(routes::notifications))
        .layer(TraceLayer::new_for_http());

    let app = if cors_permissive {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    };

    app.with_state(state)
}
