use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, Request, State,
    },
    http::{HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;
use crate::coordinator::ReservationCoordinator;
use crate::error::{codes, ServiceError};
use crate::product_client::CORRELATION_ID_HEADER;
use crate::reconciler::StuckOperationMonitor;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
    pub monitor: Arc<StuckOperationMonitor>,
}

/// Correlation id for the current request, set by [`correlation_id`].
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    error: ErrorBody,
    correlation_id: String,
}

/// A `ServiceError` bound to the request it failed.
#[derive(Debug)]
pub struct ApiError {
    error: ServiceError,
    correlation_id: String,
}

impl ApiError {
    pub fn new(error: ServiceError, correlation_id: &str) -> Self {
        Self { error, correlation_id: correlation_id.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.error.status.is_server_error() {
            tracing::error!(
                code = %self.error.code,
                message = %self.error.message,
                correlation_id = %self.correlation_id,
                "Request failed"
            );
        }

        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error.code,
                message: self.error.message,
            },
            correlation_id: self.correlation_id,
        };

        (self.error.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckQuery {
    pub older_than_secs: Option<u64>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/inventory/health", get(health_check))
        .route("/inventory/reserve", post(reserve))
        .route("/inventory/release", post(release))
        .route("/inventory/operations/stuck", get(stuck_operations))
        .route("/inventory/:product_id", get(get_inventory))
        .with_state(state)
        .layer(middleware::from_fn(correlation_id))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

/// Keeps any non-blank `X-Correlation-Id` from the caller, otherwise mints
/// one, and echoes it on the response.
pub async fn correlation_id(mut req: Request, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(CorrelationId(correlation_id.clone()));

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %req.method(),
        uri = %req.uri(),
    );

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// The header wins over the body field; both are trimmed.
pub fn resolve_idempotency_key(headers: &HeaderMap, body_key: Option<&str>) -> String {
    let from_header = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if !from_header.is_empty() {
        return from_header.to_string();
    }
    body_key.map(str::trim).unwrap_or_default().to_string()
}

fn invalid_json(correlation_id: &str) -> ApiError {
    ApiError::new(
        ServiceError::bad_request(codes::INVALID_JSON, "invalid request body"),
        correlation_id,
    )
}

pub async fn reserve(
    State(state): State<AppState>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    headers: HeaderMap,
    payload: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<Json<OperationResponse>, ApiError> {
    let Json(request) = payload.map_err(|_| invalid_json(&correlation_id))?;
    let idempotency_key = resolve_idempotency_key(&headers, request.idempotency_key.as_deref());

    state.coordinator
        .reserve(&request, &idempotency_key, &correlation_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(e, &correlation_id))
}

pub async fn release(
    State(state): State<AppState>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    headers: HeaderMap,
    payload: Result<Json<ReleaseRequest>, JsonRejection>,
) -> Result<Json<OperationResponse>, ApiError> {
    let Json(request) = payload.map_err(|_| invalid_json(&correlation_id))?;
    let idempotency_key = resolve_idempotency_key(&headers, request.idempotency_key.as_deref());

    state.coordinator
        .release(&request, &idempotency_key, &correlation_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(e, &correlation_id))
}

pub async fn get_inventory(
    State(state): State<AppState>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(product_id): Path<String>,
) -> Result<Json<InventoryView>, ApiError> {
    state.coordinator
        .check_available(&product_id, &correlation_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(e, &correlation_id))
}

pub async fn stuck_operations(
    State(state): State<AppState>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    query: Result<Query<StuckQuery>, QueryRejection>,
) -> Result<Json<Vec<Operation>>, ApiError> {
    let Query(query) = query.map_err(|_| {
        ApiError::new(
            ServiceError::bad_request(codes::INVALID_REQUEST, "olderThanSecs must be a whole number of seconds"),
            &correlation_id,
        )
    })?;
    let older_than = query
        .older_than_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.monitor.stuck_after());

    state.monitor
        .scan(older_than)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(ServiceError::storage(&e), &correlation_id))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
