pub mod dispatch;
pub mod drivers;
pub mod orders;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tokio::time::{Duration, sleep};

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(drivers::router())
        .merge(orders::router())
        .merge(dispatch::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    drivers: usize,
    orders: usize,
    runs: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        drivers: state.drivers.len(),
        orders: state.orders.len(),
        runs: state.runs.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchItemStatus {
    Created,
    Updated,
    Deleted,
    Skipped,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub key: String,
    pub status: BatchItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Every bulk operation answers with per-item results; a unit failure is
/// recorded here and never aborts the remaining chunks.
#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<BatchItem>,
}

impl BatchOutcome {
    pub fn record(&mut self, key: String, status: BatchItemStatus, detail: Option<String>) {
        match status {
            BatchItemStatus::Created | BatchItemStatus::Updated | BatchItemStatus::Deleted => {
                self.succeeded += 1
            }
            BatchItemStatus::Skipped => self.skipped += 1,
            BatchItemStatus::Failed => self.failed += 1,
        }
        self.items.push(BatchItem {
            key,
            status,
            detail,
        });
    }
}

/// Small pause between chunks so bulk writes respect the store's
/// throughput limits.
pub(crate) async fn chunk_pause(state: &AppState, chunk_index: usize) {
    if chunk_index > 0 && state.config.batch_chunk_pause_ms > 0 {
        sleep(Duration::from_millis(state.config.batch_chunk_pause_ms)).await;
    }
}
