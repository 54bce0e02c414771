//! Status API server.
//!
//! JSON-only HTTP surface over the running pipeline and the storage
//! query side: health probes, per-device status snapshots, realtime and
//! historical queries, and storage statistics. Status snapshots come from
//! shared atomic state and never block the poll loops.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::collect::{Collector, CollectorState};
use crate::device::DeviceStatus;
use crate::storage::{
    HistoricalQuery, HistoricalRecord, RealtimeQuery, RealtimeRecord, StorageBackend, StorageStats,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn StorageBackend>,
    pub collector: Arc<Collector>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Collector status response.
#[derive(Serialize)]
struct StatusResponse {
    state: CollectorState,
    queue_depth: usize,
    dropped_batches: u64,
    devices: BTreeMap<String, DeviceStatus>,
}

/// Query parameters for the realtime API.
#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    pub device: Option<String>,
    pub tag: Option<String>,
}

/// Query parameters for the historical API.
#[derive(Debug, Deserialize)]
pub struct HistoricalParams {
    pub device: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub range: Option<String>,
}

/// Parse a lookback range string. Supports: 1h, 6h, 12h, 24h, 7d, 30d.
fn parse_range(range: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    let range = range?;
    let now = chrono::Utc::now();
    match range.as_str() {
        "1h" => Some(now - chrono::Duration::hours(1)),
        "6h" => Some(now - chrono::Duration::hours(6)),
        "12h" => Some(now - chrono::Duration::hours(12)),
        "24h" => Some(now - chrono::Duration::hours(24)),
        "7d" => Some(now - chrono::Duration::days(7)),
        "30d" => Some(now - chrono::Duration::days(30)),
        _ => None,
    }
}

fn internal_error(e: crate::storage::StorageError) -> (StatusCode, String) {
    tracing::error!(error = %e, "Storage query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/status", get(status_handler))
        .route("/api/realtime", get(realtime_handler))
        .route("/api/historical", get(historical_handler))
        .route("/api/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe that checks storage connectivity.
async fn readyz_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, String)> {
    match state.backend.ping().await {
        Ok(()) => Ok(Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

/// Collector state plus per-device status snapshots.
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.collector.state().await,
        queue_depth: state.collector.queue_depth(),
        dropped_batches: state.collector.dropped_batches(),
        devices: state.collector.status().await,
    })
}

/// Current realtime snapshot.
async fn realtime_handler(
    State(state): State<AppState>,
    Query(params): Query<RealtimeParams>,
) -> Result<Json<Vec<RealtimeRecord>>, (StatusCode, String)> {
    let query = RealtimeQuery {
        device_name: params.device,
        tag_name: params.tag,
    };
    let rows = state
        .backend
        .realtime(&query)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

/// Filtered historical query, reverse-chronological.
async fn historical_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoricalParams>,
) -> Result<Json<Vec<HistoricalRecord>>, (StatusCode, String)> {
    let query = HistoricalQuery {
        device_name: params.device,
        tag_name: params.tag,
        start: parse_range(params.range),
        end: None,
        limit: params.limit,
    };
    let rows = state
        .backend
        .historical(&query)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

/// Row counts per table.
async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<StorageStats>, (StatusCode, String)> {
    let stats = state.backend.stats().await.map_err(internal_error)?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::CollectorOptions;
    use crate::device::DriverRegistry;
    use crate::storage::{SampleBatch, SqliteBackend};
    use crate::value::TagValue;
    use chrono::Utc;
    use tempfile::tempdir;

    async fn test_state(dir: &tempfile::TempDir) -> AppState {
        let path = dir.path().join("server.db");
        let backend = SqliteBackend::connect(&format!("sqlite:{}", path.display()))
            .await
            .unwrap();
        backend.init_schema().await.unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(backend);

        let collector = Arc::new(Collector::new(
            Vec::new(),
            Arc::new(DriverRegistry::new()),
            Some(Arc::clone(&backend)),
            CollectorOptions::default(),
        ));

        AppState { backend, collector }
    }

    fn batch(device: &str, tag: &str, v: f64) -> SampleBatch {
        let mut tags = std::collections::BTreeMap::new();
        tags.insert(tag.to_string(), TagValue::Float(v));
        SampleBatch::new(device, Utc::now(), tags)
    }

    #[tokio::test]
    async fn test_health_probes() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;

        let health = healthz_handler().await;
        assert_eq!(health.0.status, "ok");

        let ready = readyz_handler(State(state)).await.unwrap();
        assert_eq!(ready.0.db.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_status_reports_idle_collector() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;

        let response = status_handler(State(state)).await;
        assert_eq!(response.0.state, CollectorState::Idle);
        assert_eq!(response.0.queue_depth, 0);
        assert!(response.0.devices.is_empty());
    }

    #[tokio::test]
    async fn test_query_endpoints_serve_stored_data() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;

        state.backend.process_batch(&batch("Line1", "Speed", 42.5)).await;
        state.backend.process_batch(&batch("Line2", "Temp", 70.0)).await;

        let realtime = realtime_handler(
            State(state.clone()),
            Query(RealtimeParams {
                device: Some("Line1".to_string()),
                tag: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(realtime.0.len(), 1);
        assert_eq!(realtime.0[0].id, "Line1_Speed");

        let historical = historical_handler(
            State(state.clone()),
            Query(HistoricalParams {
                device: None,
                tag: None,
                limit: Some(10),
                range: Some("1h".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(historical.0.len(), 2);

        let stats = stats_handler(State(state)).await.unwrap();
        assert_eq!(stats.0.historical_records, 2);
        assert_eq!(stats.0.realtime_records, 2);
    }

    #[test]
    fn test_parse_range() {
        assert!(parse_range(Some("24h".to_string())).is_some());
        assert!(parse_range(Some("7d".to_string())).is_some());
        assert!(parse_range(Some("yesterday".to_string())).is_none());
        assert!(parse_range(None).is_none());
    }
}
