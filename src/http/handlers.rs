//! Ingestion and query handlers.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::request::request_id;
use crate::http::response::{ApiError, MessageBody};
use crate::http::server::AppState;
use crate::registry::query::StatsReport;
use crate::registry::{
    EnqueueOutcome, InvalidFilter, InvalidUsageEntry, ListFilter, MetricRecord, MetricUsage, Page,
    RegistryExport, ScanReport, UsageFact,
};

/// Body of `POST /api/v1/usage/facts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactsRequest {
    pub facts: Vec<UsageFact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

fn accepted(outcome: EnqueueOutcome) -> Result<(StatusCode, Json<MessageBody>), ApiError> {
    match outcome {
        EnqueueOutcome::Accepted => Ok((StatusCode::ACCEPTED, Json(MessageBody::new("OK")))),
        EnqueueOutcome::Dropped => Err(ApiError::QueueFull),
    }
}

/// Full-replace ingestion of one source scan.
pub async fn push_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(report): Json<ScanReport>,
) -> Result<(StatusCode, Json<MessageBody>), ApiError> {
    tracing::debug!(
        request_id = %request_id(&headers),
        source = %report.source,
        valid = report.valid_metrics.len(),
        invalid = report.invalid_metrics.len(),
        "Usage scan received"
    );
    accepted(state.queue.enqueue_scan(report).await?)
}

/// Incremental upsert of loose facts.
pub async fn push_facts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FactsRequest>,
) -> Result<(StatusCode, Json<MessageBody>), ApiError> {
    tracing::debug!(
        request_id = %request_id(&headers),
        facts = request.facts.len(),
        "Usage facts received"
    );
    accepted(state.queue.enqueue_facts(request.facts).await?)
}

pub async fn list_metrics(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Json<Page<MetricRecord>> {
    Json(state.query.list(&filter))
}

pub async fn get_metric(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<MetricUsage>) {
    let usage = state.query.get_metric(&name);
    let status = if usage.found {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(usage))
}

pub async fn list_invalid(
    State(state): State<AppState>,
    Query(filter): Query<InvalidFilter>,
) -> Json<Vec<InvalidUsageEntry>> {
    Json(state.query.list_invalid(&filter))
}

pub async fn export(State(state): State<AppState>) -> Json<RegistryExport> {
    Json(state.query.export())
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsReport> {
    Json(state.query.stats())
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
