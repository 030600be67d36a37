//! HTTP surface.
//!
//! - `GET /health`: liveness, no auth
//! - `GET /waypoints`: CSV export filtered by time, box and source
//! - `POST /ingest`: queue batch ingestion

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::auth::BasicCredentials;
use super::error::ApiError;
use crate::ingest::{EnvelopeBatch, IngestHandler, IngestReport};
use crate::query::{QueryParams, QueryRequest, WaypointQuery};
use crate::response::render_csv;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestHandler>,
    pub query: Arc<WaypointQuery>,
    pub credentials: BasicCredentials,
}

/// Start the REST server.
///
/// When `port` is 0, the OS assigns an ephemeral port. The actual bound
/// port is always logged so it can be discovered.
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let actual_port = listener.local_addr()?.port();
    info!(host = %host, port = actual_port, "waypoint API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/waypoints", get(waypoints))
        .route("/ingest", post(ingest))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn waypoints(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    state.credentials.verify(&headers)?;

    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request = QueryRequest::from_params(&params)?;
    let hits = state.query.run(&request).await?;
    let csv = render_csv(&hits)?;

    Ok(([(CONTENT_TYPE, "text/csv")], csv).into_response())
}

async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    batch: Result<Json<EnvelopeBatch>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    state.credentials.verify(&headers)?;

    let Json(batch) = batch.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let report = state.ingest.handle(&batch.records).await?;

    Ok(Json(IngestResponse { ok: true, report }))
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
struct IngestResponse {
    ok: bool,
    #[serde(flatten)]
    report: IngestReport,
}
