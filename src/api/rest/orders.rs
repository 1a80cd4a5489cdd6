use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::rest::{BatchItemStatus, BatchOutcome, chunk_pause};
use crate::error::AppError;
use crate::models::order::{DailyOrder, GeoPoint, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/import", post(import_orders))
        .route("/orders/reset", post(reset_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/complete", post(complete_order))
}

/// One marketplace row. The ingestion collaborator owns every field here;
/// the engine never rewrites them after import.
#[derive(Debug, Deserialize)]
pub struct OrderImport {
    pub external_id: String,
    pub order_date: NaiveDate,
    pub pickup_address: String,
    #[serde(default)]
    pub pickup_coords: Option<GeoPoint>,
    pub pickup_time: NaiveTime,
    pub dropoff_address: String,
    #[serde(default)]
    pub dropoff_coords: Option<GeoPoint>,
    pub dropoff_time: NaiveTime,
}

async fn import_orders(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Vec<OrderImport>>,
) -> Result<Json<BatchOutcome>, AppError> {
    let mut outcome = BatchOutcome::default();
    let chunk_size = state.config.batch_chunk_size.max(1);

    for (chunk_index, chunk) in payload.chunks(chunk_size).enumerate() {
        chunk_pause(&state, chunk_index).await;

        for import in chunk {
            let key = format!("{}/{}", import.order_date, import.external_id);

            if import.external_id.trim().is_empty() {
                outcome.record(
                    key,
                    BatchItemStatus::Failed,
                    Some("external_id cannot be empty".to_string()),
                );
                continue;
            }
            if import.pickup_address.trim().is_empty() || import.dropoff_address.trim().is_empty()
            {
                outcome.record(
                    key,
                    BatchItemStatus::Failed,
                    Some("pickup and dropoff addresses are required".to_string()),
                );
                continue;
            }

            // Marketplace ids are unique per day; re-imports are skipped,
            // not duplicated.
            let duplicate = state.orders.iter().any(|entry| {
                entry.value().order_date == import.order_date
                    && entry.value().external_id == import.external_id
            });
            if duplicate {
                outcome.record(
                    key,
                    BatchItemStatus::Skipped,
                    Some("already imported for this date".to_string()),
                );
                continue;
            }

            let detail = (import.dropoff_time < import.pickup_time)
                .then(|| "dropoff time precedes pickup time".to_string());

            let order = DailyOrder {
                id: Uuid::new_v4(),
                external_id: import.external_id.clone(),
                order_date: import.order_date,
                pickup_address: import.pickup_address.clone(),
                pickup_coords: import.pickup_coords,
                pickup_time: import.pickup_time,
                dropoff_address: import.dropoff_address.clone(),
                dropoff_coords: import.dropoff_coords,
                dropoff_time: import.dropoff_time,
                status: OrderStatus::Fetched,
                driver_id: None,
                driver_name: None,
                created_at: Utc::now(),
            };
            state.orders.insert(order.id, order);
            outcome.record(key, BatchItemStatus::Created, detail);
        }
    }

    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct ListOrdersQuery {
    pub date: Option<NaiveDate>,
    pub status: Option<OrderStatus>,
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Json<Vec<DailyOrder>> {
    let mut orders: Vec<DailyOrder> = state
        .orders
        .iter()
        .filter(|entry| {
            let order = entry.value();
            query.date.is_none_or(|date| order.order_date == date)
                && query.status.is_none_or(|status| order.status == status)
        })
        .map(|entry| entry.value().clone())
        .collect();
    orders.sort_by(|a, b| {
        (a.order_date, a.pickup_time, &a.external_id).cmp(&(b.order_date, b.pickup_time, &b.external_id))
    });
    Json(orders)
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DailyOrder>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order.value().clone()))
}

/// Fulfillment reporting seam: an assigned order was delivered.
async fn complete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DailyOrder>, AppError> {
    let mut order = state
        .orders
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    if order.status != OrderStatus::Assigned {
        return Err(AppError::Conflict(format!(
            "order {id} is not assigned and cannot be completed"
        )));
    }

    order.status = OrderStatus::Completed;
    Ok(Json(order.clone()))
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub date: NaiveDate,
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub date: NaiveDate,
    pub reset: usize,
}

/// Reverts every Assigned order of one date back to Fetched and clears the
/// driver fields. Completed orders and other dates are never touched;
/// re-issuing the reset is safe and resets zero.
async fn reset_orders(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResetRequest>,
) -> Json<ResetResponse> {
    let mut reset = 0usize;

    for mut entry in state.orders.iter_mut() {
        let order = entry.value_mut();
        if order.order_date == payload.date && order.status == OrderStatus::Assigned {
            order.status = OrderStatus::Fetched;
            order.driver_id = None;
            order.driver_name = None;
            reset += 1;
        }
    }

    info!(date = %payload.date, reset, "orders reset to fetched");

    Json(ResetResponse {
        date: payload.date,
        reset,
    })
}
