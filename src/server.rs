//! HTTP server for plan submission and retrieval.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/manual_ingest` | Submit a plan (authenticated) |
//! | `GET`  | `/plans` | List plans, newest first (`project_id`, `component_id`, `environment` filters) |
//! | `GET`  | `/plans/{id}` | Fetch one plan document |
//! | `DELETE` | `/plans/{id}` | Delete a plan document and its artifact |
//!
//! # Authentication
//!
//! `POST /manual_ingest` accepts either the internal secret in the
//! `x-internal-secret` header or a project token as
//! `Authorization: Bearer tdp_<project_id>_<secret>`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "stale_plan", "message": "stale plan: ..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `stale_plan`, `platform_mismatch` | 400 |
//! | `unauthorized` | 401 |
//! | `forbidden` | 403 |
//! | `not_found` | 404 |
//! | `ambiguous` | 409 |
//! | `too_large` | 413 (request body over `[server].max_body_bytes`, or pruned document over `[ingest].max_item_bytes`) |
//! | `internal` | 500 |

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use plan_harness_core::error::ConflictError;
use plan_harness_core::projection::PlanDocument;
use plan_harness_core::store::PlanFilter;
use plan_harness_core::IngestError;

use crate::auth::{self, INTERNAL_SECRET_HEADER};
use crate::config::Config;
use crate::ingest;
use crate::plans;
use crate::services::Services;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Build the router over already-opened services.
pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = DefaultBodyLimit::max(services.config.server.max_body_bytes);

    Router::new()
        .route("/health", get(handle_health))
        .route("/manual_ingest", post(handle_manual_ingest))
        .route("/plans", get(handle_list_plans))
        .route("/plans/{id}", get(handle_get_plan).delete(handle_delete_plan))
        .layer(body_limit)
        .layer(cors)
        .with_state(AppState { services })
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Arc::new(Services::open(config).await?);
    if config.auth.internal_secret.is_none() {
        tracing::warn!("auth.internal_secret is not set; only project tokens can submit plans");
    }

    let app = router(services);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("plan server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Request body could not be buffered, usually because it exceeds
/// `[server].max_body_bytes`.
fn body_error(rejection: BytesRejection) -> AppError {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "too_large"
    } else {
        "bad_request"
    };
    tracing::info!(code, "request body rejected: {}", rejection.body_text());
    app_error(status, code, rejection.body_text())
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!("request failed: {:#}", err);
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", err))
}

/// HTTP status for an ingestion failure.
pub fn status_for(err: &IngestError) -> StatusCode {
    match err {
        IngestError::Validation(_) => StatusCode::BAD_REQUEST,
        IngestError::NotFound(_) => StatusCode::NOT_FOUND,
        IngestError::Conflict(ConflictError::AmbiguousComponent { .. }) => StatusCode::CONFLICT,
        IngestError::Conflict(ConflictError::Stale(_)) => StatusCode::BAD_REQUEST,
        IngestError::Conflict(ConflictError::PlatformMismatch { .. }) => StatusCode::BAD_REQUEST,
        IngestError::Forbidden(_) => StatusCode::FORBIDDEN,
        IngestError::Capacity { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        if err.is_client_fault() {
            tracing::info!(code = err.code(), "plan rejected: {}", err);
        } else {
            tracing::error!("plan ingestion failed: {}", err);
        }
        app_error(status_for(&err), err.code(), err.to_string())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /manual_ingest ============

#[derive(Serialize)]
struct IngestResponse {
    id: String,
    message: String,
    pending_approval: bool,
}

async fn handle_manual_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let caller = auth::authenticate(
        &state.services.store,
        &state.services.config.auth,
        header(INTERNAL_SECRET_HEADER),
        header("authorization"),
    )
    .await
    .map_err(internal)?
    .ok_or_else(|| {
        app_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid or missing access token or internal secret",
        )
    })?;

    let body = body.map_err(body_error)?;
    let body: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid JSON: {}", e)))?;

    let outcome = ingest::submit(&state.services, body, &caller).await?;
    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            id: outcome.plan_id,
            message: "Plan uploaded successfully".to_string(),
            pending_approval: outcome.pending_approval,
        }),
    ))
}

// ============ /plans ============

#[derive(Deserialize)]
struct PlanQuery {
    project_id: Option<String>,
    component_id: Option<String>,
    environment: Option<String>,
    limit: Option<usize>,
}

async fn handle_list_plans(
    State(state): State<AppState>,
    Query(query): Query<PlanQuery>,
) -> Result<Json<Vec<PlanDocument>>, AppError> {
    if query.limit == Some(0) {
        return Err(bad_request("limit must be >= 1"));
    }
    let filter = PlanFilter {
        project_id: query.project_id,
        component_id: query.component_id,
        environment: query.environment,
        limit: query.limit,
    };
    let docs = plans::list_plans(&state.services, filter)
        .await
        .map_err(internal)?;
    Ok(Json(docs))
}

async fn handle_get_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PlanDocument>, AppError> {
    plans::get_plan(&state.services, &id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("plan not found: {}", id)))
}

async fn handle_delete_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    match plans::delete_plan(&state.services, &id)
        .await
        .map_err(internal)?
    {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(not_found(format!("plan not found: {}", id))),
    }
}
