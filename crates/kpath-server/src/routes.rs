//! HTTP routes under `/api/v1`
//!
//! | method | path | auth |
//! |---|---|---|
//! | POST/GET | `/api/v1/search/search` | any principal |
//! | GET | `/api/v1/search/status` | any principal |
//! | POST | `/api/v1/search/rebuild` | admin |
//! | POST | `/api/v1/search/initialize` | admin |
//! | POST | `/api/v1/search/feedback` | any principal |
//! | GET | `/api/v1/health` | none |
//!
//! Errors map to `400 / 401 / 403 / 408 / 503 / 500`; `503` carries a
//! `Retry-After`. Internal faults are reported without detail.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use kpath_core::Principal;
use kpath_search_core::{SearchError, SearchRequest, SearchResponse};

use crate::auth::{authenticate, is_admin};
use crate::state::AppState;

/// Extra wall-clock allowance over the pipeline's own deadline before the
/// request is abandoned at the HTTP layer.
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/search/search",
            post(search_post).get(search_get),
        )
        .route("/api/v1/search/status", get(search_status))
        .route("/api/v1/search/rebuild", post(search_rebuild))
        .route("/api/v1/search/initialize", post(search_initialize))
        .route("/api/v1/search/feedback", post(record_selection))
        .route("/api/v1/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ────────────────────────────────────────────────────────────────────
// Error mapping
// ────────────────────────────────────────────────────────────────────

/// A pipeline error on its way to an HTTP response.
#[derive(Debug)]
pub struct ApiError(SearchError);

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let (status, message) = match &err {
            SearchError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            SearchError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            SearchError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            SearchError::Timeout(_) => (
                StatusCode::REQUEST_TIMEOUT,
                "search deadline exceeded".to_owned(),
            ),
            SearchError::IndexNotReady(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            // Everything else is an internal fault; no detail leaves the
            // process
            _ => {
                tracing::error!(error = %err, "internal error serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_owned(),
                )
            }
        };

        let body = Json(ErrorBody {
            error: err.error_type(),
            message,
        });
        let mut response = (status, body).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("5"));
        }
        response
    }
}

// ────────────────────────────────────────────────────────────────────
// Search
// ────────────────────────────────────────────────────────────────────

/// Query parameters accepted by both search verbs (`api_key` everywhere,
/// the rest only meaningful on GET).
#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    query: Option<String>,
    limit: Option<usize>,
    min_score: Option<f64>,
    domains: Option<String>,
    capabilities: Option<String>,
    api_key: Option<String>,
}

fn comma_set(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

async fn search_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let principal = authenticate(&state, &headers, params.api_key.as_deref())?;
    run_search(state, principal, request).await.map(Json)
}

async fn search_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let principal = authenticate(&state, &headers, params.api_key.as_deref())?;
    let request = SearchRequest {
        query: params.query.clone().unwrap_or_default(),
        limit: params.limit,
        min_score: params.min_score,
        domains: comma_set(params.domains.as_deref()),
        capabilities: comma_set(params.capabilities.as_deref()),
    };
    run_search(state, principal, request).await.map(Json)
}

/// Run the synchronous pipeline on a blocking thread with an outer
/// timeout slightly beyond the pipeline's own deadline.
async fn run_search(
    state: AppState,
    principal: Principal,
    request: SearchRequest,
) -> Result<SearchResponse, ApiError> {
    let budget =
        Duration::from_millis(state.config.search_default_timeout_ms) + TIMEOUT_GRACE;
    let pipeline = state.pipeline.clone();

    let outcome = tokio::time::timeout(
        budget,
        tokio::task::spawn_blocking(move || pipeline.search(&request, &principal)),
    )
    .await;

    match outcome {
        Err(_elapsed) => Err(SearchError::Timeout("search deadline exceeded".to_owned()).into()),
        Ok(Err(join_err)) => {
            Err(SearchError::Internal(format!("search task failed: {join_err}")).into())
        }
        Ok(Ok(result)) => result.map_err(ApiError::from),
    }
}

// ────────────────────────────────────────────────────────────────────
// Lifecycle
// ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusBody {
    initialized: bool,
    index_built: bool,
    embedding_model: String,
    total_vectors: usize,
    snapshot_generation: u64,
    pending: usize,
    unindexable: usize,
    degraded: bool,
}

async fn search_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<StatusBody>, ApiError> {
    authenticate(&state, &headers, params.api_key.as_deref())?;
    let health = state.manager.health();
    Ok(Json(StatusBody {
        initialized: health.ready,
        index_built: health.ready,
        embedding_model: health.embedding_model,
        total_vectors: health.total_vectors,
        snapshot_generation: health.snapshot_generation,
        pending: health.pending,
        unindexable: health.unindexable,
        degraded: health.degraded,
    }))
}

#[derive(Serialize)]
struct RebuildBody {
    job_id: String,
    status: &'static str,
}

async fn search_rebuild(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<RebuildBody>, ApiError> {
    let principal = authenticate(&state, &headers, params.api_key.as_deref())?;
    if !is_admin(&state, &principal) {
        return Err(SearchError::Forbidden("rebuild requires the admin role".to_owned()).into());
    }

    state.manager.request_rebuild();
    tracing::info!(principal = %principal.principal_id, "rebuild requested");
    Ok(Json(RebuildBody {
        job_id: uuid::Uuid::new_v4().to_string(),
        status: "started",
    }))
}

#[derive(Serialize)]
struct InitializeBody {
    status: &'static str,
}

async fn search_initialize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<InitializeBody>, ApiError> {
    let principal = authenticate(&state, &headers, params.api_key.as_deref())?;
    if !is_admin(&state, &principal) {
        return Err(
            SearchError::Forbidden("initialize requires the admin role".to_owned()).into(),
        );
    }

    if state.manager.is_ready() {
        return Ok(Json(InitializeBody {
            status: "already_initialized",
        }));
    }

    let manager = state.manager.clone();
    tokio::task::spawn_blocking(move || manager.initialize())
        .await
        .map_err(|join_err| SearchError::Internal(format!("initialize failed: {join_err}")))?
        .map_err(ApiError::from)?;
    Ok(Json(InitializeBody {
        status: "initialized",
    }))
}

// ────────────────────────────────────────────────────────────────────
// Feedback
// ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SelectionBody {
    search_id: String,
    service_id: i64,
    position: u32,
}

#[derive(Serialize)]
struct SelectionAck {
    status: &'static str,
}

async fn record_selection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
    Json(body): Json<SelectionBody>,
) -> Result<Json<SelectionAck>, ApiError> {
    authenticate(&state, &headers, params.api_key.as_deref())?;

    state
        .feedback
        .record_selection(&body.search_id, body.service_id, body.position)
        .map_err(|err| match err {
            kpath_db::DbError::NotFound(msg) => SearchError::InvalidRequest(msg),
            other => SearchError::TransientDependency(other.to_string()),
        })?;
    Ok(Json(SelectionAck { status: "recorded" }))
}

// ────────────────────────────────────────────────────────────────────
// Liveness
// ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}
