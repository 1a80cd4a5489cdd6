use std::collections::HashSet;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use chrono::{Utc, Weekday};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::{BatchItemStatus, BatchOutcome, chunk_pause};
use crate::error::AppError;
use crate::models::driver::{Driver, DriverPreferences, DriverStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", get(list_drivers))
        .route("/drivers/import", post(import_drivers))
        .route("/drivers/purge", post(purge_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
}

/// One roster row from the semi-structured import source. Identity and
/// preference fields only; derived statistics stay owned by the feedback
/// updater and survive re-imports.
#[derive(Debug, Deserialize)]
pub struct DriverImport {
    pub id: Option<Uuid>,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub preferred_language: Option<String>,
    #[serde(default)]
    pub status: Option<DriverStatus>,
    #[serde(default)]
    pub working_days: HashSet<Weekday>,
    #[serde(default)]
    pub max_orders_per_day: Option<u32>,
    #[serde(default)]
    pub can_do_long_distance: bool,
    #[serde(default)]
    pub early_morning_eligible: bool,
    #[serde(default)]
    pub reliability_tier: Option<u8>,
    #[serde(default)]
    pub is_top_dasher: bool,
    #[serde(default)]
    pub is_joker_driver: bool,
    #[serde(default)]
    pub preferences: DriverPreferences,
}

fn validate_import(import: &DriverImport) -> Result<(), String> {
    if import.name.trim().is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if import.phone.trim().is_empty() {
        return Err("phone cannot be empty".to_string());
    }
    if import.max_orders_per_day == Some(0) {
        return Err("max_orders_per_day must be > 0".to_string());
    }
    if let Some(tier) = import.reliability_tier {
        if !(1..=4).contains(&tier) {
            return Err(format!("reliability_tier must be 1..=4, got {tier}"));
        }
    }
    if import.preferences.region_priorities.values().any(|&rank| rank == 0) {
        return Err("region_priorities ranks start at 1".to_string());
    }
    if import
        .preferences
        .preferred_areas
        .iter()
        .any(|area| area.trim().is_empty())
    {
        return Err("preferred_areas entries cannot be empty".to_string());
    }
    Ok(())
}

async fn import_drivers(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Vec<DriverImport>>,
) -> Result<Json<BatchOutcome>, AppError> {
    let mut outcome = BatchOutcome::default();
    let chunk_size = state.config.batch_chunk_size.max(1);

    for (chunk_index, chunk) in payload.chunks(chunk_size).enumerate() {
        chunk_pause(&state, chunk_index).await;

        for import in chunk {
            let key = import
                .id
                .map(|id| id.to_string())
                .unwrap_or_else(|| import.name.clone());

            if let Err(reason) = validate_import(import) {
                outcome.record(key, BatchItemStatus::Failed, Some(reason));
                continue;
            }

            // Display names are not unique in the source data; flag the
            // collision but never block the import on it.
            let duplicate_name = state.drivers.iter().any(|entry| {
                entry.value().name.eq_ignore_ascii_case(&import.name)
                    && Some(*entry.key()) != import.id
            });
            let detail = duplicate_name
                .then(|| format!("display name '{}' already in roster", import.name));

            let existing = import
                .id
                .and_then(|id| state.drivers.get(&id).map(|d| d.value().clone()));
            match existing {
                Some(current) => {
                    let updated = Driver {
                        id: current.id,
                        name: import.name.clone(),
                        phone: import.phone.clone(),
                        preferred_language: import
                            .preferred_language
                            .clone()
                            .unwrap_or(current.preferred_language),
                        status: import.status.unwrap_or(current.status),
                        working_days: import.working_days.clone(),
                        max_orders_per_day: import
                            .max_orders_per_day
                            .unwrap_or(current.max_orders_per_day),
                        can_do_long_distance: import.can_do_long_distance,
                        early_morning_eligible: import.early_morning_eligible,
                        reliability_tier: import.reliability_tier.unwrap_or(current.reliability_tier),
                        is_top_dasher: import.is_top_dasher,
                        is_joker_driver: import.is_joker_driver,
                        preferences: import.preferences.clone(),
                        // Derived fields are merged, never replaced by import.
                        distance_stats: current.distance_stats,
                        region_profile: current.region_profile,
                        typical_location: current.typical_location,
                        chain_history: current.chain_history,
                        updated_at: Utc::now(),
                    };
                    state.drivers.insert(updated.id, updated);
                    outcome.record(key, BatchItemStatus::Updated, detail);
                }
                None => {
                    let driver = Driver {
                        id: import.id.unwrap_or_else(Uuid::new_v4),
                        name: import.name.clone(),
                        phone: import.phone.clone(),
                        preferred_language: import
                            .preferred_language
                            .clone()
                            .unwrap_or_else(|| "en".to_string()),
                        status: import.status.unwrap_or(DriverStatus::Active),
                        working_days: import.working_days.clone(),
                        max_orders_per_day: import.max_orders_per_day.unwrap_or(5),
                        can_do_long_distance: import.can_do_long_distance,
                        early_morning_eligible: import.early_morning_eligible,
                        reliability_tier: import.reliability_tier.unwrap_or(4),
                        is_top_dasher: import.is_top_dasher,
                        is_joker_driver: import.is_joker_driver,
                        preferences: import.preferences.clone(),
                        distance_stats: Default::default(),
                        region_profile: None,
                        typical_location: None,
                        chain_history: Vec::new(),
                        updated_at: Utc::now(),
                    };
                    let key = driver.id.to_string();
                    state.drivers.insert(driver.id, driver);
                    outcome.record(key, BatchItemStatus::Created, detail);
                }
            }
        }
    }

    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct PurgeRequest {
    pub ids: Vec<Uuid>,
}

/// Explicit bulk-maintenance delete; the engine itself never removes
/// drivers.
async fn purge_drivers(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PurgeRequest>,
) -> Json<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    let chunk_size = state.config.batch_chunk_size.max(1);

    for (chunk_index, chunk) in payload.ids.chunks(chunk_size).enumerate() {
        chunk_pause(&state, chunk_index).await;

        for id in chunk {
            match state.drivers.remove(id) {
                Some(_) => outcome.record(id.to_string(), BatchItemStatus::Deleted, None),
                None => outcome.record(
                    id.to_string(),
                    BatchItemStatus::Skipped,
                    Some("unknown driver".to_string()),
                ),
            }
        }
    }

    Json(outcome)
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let mut drivers: Vec<Driver> = state.drivers.iter().map(|e| e.value().clone()).collect();
    drivers.sort_by_key(|d| d.id);
    Json(drivers)
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(driver.value().clone()))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    driver.status = payload.status;
    driver.updated_at = Utc::now();

    Ok(Json(driver.clone()))
}
