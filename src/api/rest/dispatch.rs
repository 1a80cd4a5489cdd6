use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::assignment::run_for_date;
use crate::engine::chain::build_chain;
use crate::engine::feedback::{ProfileUpdate, refresh_profiles};
use crate::error::AppError;
use crate::models::assignment::{RunOutcome, UnassignedReason};
use crate::models::chain::Chain;
use crate::models::order::{DailyOrder, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dispatch/:date", post(run_dispatch))
        .route("/dispatch/:date/report", get(dispatch_report))
        .route("/drivers/:id/chain/:date", get(driver_chain))
        .route("/profiles/refresh", post(refresh))
}

/// Runs the engine for one date. An optional body overrides the engine
/// configuration for this run only, for weight experiments.
async fn run_dispatch(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
    overrides: Option<Json<EngineConfig>>,
) -> Result<Json<RunOutcome>, AppError> {
    let cfg = match overrides {
        Some(Json(cfg)) => cfg,
        None => state.config.engine.clone(),
    };

    let outcome = run_for_date(&state, date, cfg).await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
pub struct DriverReportRow {
    pub driver_id: Uuid,
    pub driver_name: String,
    pub assigned: usize,
    pub max_orders_per_day: u32,
    pub exceeded: bool,
}

#[derive(Serialize)]
pub struct UnassignedView {
    pub order_id: Uuid,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnassignedReason>,
}

/// Read-only diagnostics for one date: load vs cap, cap overruns (manual
/// overrides bypassing the engine), unassigned orders with the reason from
/// the last run, and every driver's chain.
#[derive(Serialize)]
pub struct DispatchReport {
    pub date: NaiveDate,
    pub drivers: Vec<DriverReportRow>,
    pub exceeded_cap: Vec<Uuid>,
    pub unassigned: Vec<UnassignedView>,
    pub chains: Vec<Chain>,
}

async fn dispatch_report(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
) -> Json<DispatchReport> {
    let day_orders: Vec<DailyOrder> = state
        .orders
        .iter()
        .filter(|entry| entry.value().order_date == date)
        .map(|entry| entry.value().clone())
        .collect();

    let reasons = state.runs.get(&date).map(|outcome| {
        outcome
            .unassigned
            .iter()
            .map(|u| (u.order_id, u.reason))
            .collect::<std::collections::HashMap<_, _>>()
    });

    let mut drivers: Vec<DriverReportRow> = Vec::new();
    let mut exceeded_cap: Vec<Uuid> = Vec::new();
    let mut chains: Vec<Chain> = Vec::new();

    let mut roster: Vec<_> = state.drivers.iter().map(|e| e.value().clone()).collect();
    roster.sort_by_key(|d| d.id);

    for driver in &roster {
        let assigned_orders: Vec<DailyOrder> = day_orders
            .iter()
            .filter(|o| o.driver_id == Some(driver.id))
            .cloned()
            .collect();
        let assigned = assigned_orders.len();
        let exceeded = assigned as u32 > driver.max_orders_per_day;

        if exceeded {
            exceeded_cap.push(driver.id);
        }
        if !assigned_orders.is_empty() {
            chains.push(build_chain(
                driver,
                date,
                assigned_orders,
                &state.config.engine,
            ));
        }

        drivers.push(DriverReportRow {
            driver_id: driver.id,
            driver_name: driver.name.clone(),
            assigned,
            max_orders_per_day: driver.max_orders_per_day,
            exceeded,
        });
    }

    let mut unassigned: Vec<UnassignedView> = day_orders
        .iter()
        .filter(|o| o.status == OrderStatus::Fetched)
        .map(|o| UnassignedView {
            order_id: o.id,
            external_id: o.external_id.clone(),
            reason: reasons
                .as_ref()
                .and_then(|map| map.get(&o.id).copied()),
        })
        .collect();
    unassigned.sort_by(|a, b| a.external_id.cmp(&b.external_id));

    Json(DispatchReport {
        date,
        drivers,
        exceeded_cap,
        unassigned,
        chains,
    })
}

async fn driver_chain(
    State(state): State<Arc<AppState>>,
    Path((id, date)): Path<(Uuid, NaiveDate)>,
) -> Result<Json<Chain>, AppError> {
    let driver = state
        .drivers
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    let orders: Vec<DailyOrder> = state
        .orders
        .iter()
        .filter(|entry| {
            entry.value().order_date == date && entry.value().driver_id == Some(id)
        })
        .map(|entry| entry.value().clone())
        .collect();

    Ok(Json(build_chain(&driver, date, orders, &state.config.engine)))
}

/// Recomputes derived driver statistics from completed-order history.
async fn refresh(State(state): State<Arc<AppState>>) -> Json<Vec<ProfileUpdate>> {
    let updates = refresh_profiles(&state, &state.config.engine);
    Json(updates)
}
