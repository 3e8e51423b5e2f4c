//! Axum route handlers for the dashboard RPC API.

use crate::db::TelemetryLog;
use crate::window::WindowReader;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use iiot_types::*;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_WINDOW_ROWS: usize = 200;
pub const MAX_WINDOW_ROWS: usize = 1000;

pub struct AppState {
    pub log: TelemetryLog,
    pub window: WindowReader,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(log: TelemetryLog) -> Self {
        Self {
            window: WindowReader::new(log.clone()),
            log,
            start_time: Instant::now(),
        }
    }
}

pub fn window_rows(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_WINDOW_ROWS)
        .clamp(1, MAX_WINDOW_ROWS)
}

// GET /rpc/window?rows=N
pub async fn window(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> (StatusCode, Json<RpcResponse<WindowSeries>>) {
    let rows = window_rows(query.rows);
    let reader = state.window.clone();
    match tokio::task::spawn_blocking(move || reader.read_window(rows)).await {
        Ok(Ok(series)) => (StatusCode::OK, Json(RpcResponse::ok(series))),
        Ok(Err(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RpcResponse::err(format!("Failed to read window: {}", e))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Window task failed: {}", e))),
        ),
    }
}

// GET /rpc/status
pub async fn status(State(state): State<Arc<AppState>>) -> (StatusCode, Json<RpcResponse<ServiceStatus>>) {
    let log = state.log.clone();
    let result = tokio::task::spawn_blocking(move || -> crate::error::PipelineResult<_> {
        let total = log.count()?;
        let latest = log.latest(1)?.pop();
        Ok((total, latest))
    })
    .await;

    match result {
        Ok(Ok((total_records, latest))) => (
            StatusCode::OK,
            Json(RpcResponse::ok(ServiceStatus {
                running: true,
                uptime_secs: state.start_time.elapsed().as_secs(),
                total_records,
                latest,
            })),
        ),
        Ok(Err(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RpcResponse::err(format!("Failed to read status: {}", e))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Status task failed: {}", e))),
        ),
    }
}
