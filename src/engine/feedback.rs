use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::estimate_km;
use crate::geo::parse_address;
use crate::models::driver::DistanceStats;
use crate::models::order::{DailyOrder, GeoPoint, OrderStatus};
use crate::models::profile::RegionProfile;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub driver_id: Uuid,
    pub driver_name: String,
    pub orders_considered: usize,
    pub primary_region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProfileDerivation {
    pub distance_stats: DistanceStats,
    pub region_profile: RegionProfile,
    pub typical_location: Option<GeoPoint>,
}

/// Distance and region statistics from one driver's completed orders.
/// Returns `None` when there is no history to learn from.
pub fn derive_profile(
    orders: &[DailyOrder],
    cfg: &EngineConfig,
    computed_at: DateTime<Utc>,
) -> Option<ProfileDerivation> {
    if orders.is_empty() {
        return None;
    }

    let mut distances: Vec<f64> = Vec::with_capacity(orders.len());
    let mut cross_state = 0usize;
    let mut state_pairs = 0usize;
    let mut city_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut state_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut zip_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut coords: Vec<GeoPoint> = Vec::new();

    for order in orders {
        let pickup_parts = parse_address(&order.pickup_address);
        let dropoff_parts = parse_address(&order.dropoff_address);

        distances.push(estimate_km(
            order.pickup_coords.as_ref(),
            &pickup_parts,
            order.dropoff_coords.as_ref(),
            &dropoff_parts,
        ));

        if let (Some(from), Some(to)) = (&pickup_parts.state, &dropoff_parts.state) {
            state_pairs += 1;
            if !from.eq_ignore_ascii_case(to) {
                cross_state += 1;
            }
        }

        for parts in [&pickup_parts, &dropoff_parts] {
            if let Some(city) = &parts.city {
                *city_counts.entry(city.clone()).or_insert(0) += 1;
            }
            if let Some(state) = &parts.state {
                *state_counts.entry(state.clone()).or_insert(0) += 1;
            }
            if let Some(zip) = &parts.zip {
                *zip_counts.entry(zip.clone()).or_insert(0) += 1;
            }
        }

        coords.extend(order.pickup_coords);
        coords.extend(order.dropoff_coords);
    }

    let total = distances.len() as f64;
    let long = distances
        .iter()
        .filter(|&&km| km > cfg.long_distance_threshold_km)
        .count() as f64;
    let distance_stats = DistanceStats {
        avg_distance_km: distances.iter().sum::<f64>() / total,
        max_distance_km: distances.iter().copied().fold(0.0, f64::max),
        long_distance_percentage: long / total * 100.0,
        cross_state_percentage: if state_pairs == 0 {
            0.0
        } else {
            cross_state as f64 / state_pairs as f64 * 100.0
        },
    };

    let state_stop_total: usize = state_counts.values().sum();
    let state_share: BTreeMap<String, f64> = state_counts
        .iter()
        .map(|(state, count)| (state.clone(), *count as f64 / state_stop_total.max(1) as f64))
        .collect();

    let primary_region = classify_primary_region(&state_share, &city_counts, cfg);

    let region_profile = RegionProfile {
        primary_region,
        top_cities: top_entries(&city_counts),
        top_states: top_entries(&state_counts),
        top_zip_codes: top_entries(&zip_counts),
        state_share,
        computed_at,
    };

    let typical_location = if coords.is_empty() {
        None
    } else {
        let n = coords.len() as f64;
        Some(GeoPoint {
            lat: coords.iter().map(|p| p.lat).sum::<f64>() / n,
            lng: coords.iter().map(|p| p.lng).sum::<f64>() / n,
        })
    };

    Some(ProfileDerivation {
        distance_stats,
        region_profile,
        typical_location,
    })
}

/// A state qualifies as the primary region when it holds at least the
/// configured share of stops and the history touches one of that state's
/// anchor cities.
fn classify_primary_region(
    state_share: &BTreeMap<String, f64>,
    city_counts: &BTreeMap<String, usize>,
    cfg: &EngineConfig,
) -> Option<String> {
    let (state, share) = state_share
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))?;

    if *share < cfg.primary_region_share {
        return None;
    }

    let anchors = cfg.anchor_cities.get(state)?;
    let anchored = anchors
        .iter()
        .any(|anchor| city_counts.keys().any(|city| city.eq_ignore_ascii_case(anchor)));

    anchored.then(|| state.clone())
}

fn top_entries(counts: &BTreeMap<String, usize>) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> =
        counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(5);
    entries
}

/// Recomputes every driver's derived fields from Completed-order history
/// and merges them into the roster. Manually curated preference fields are
/// never replaced.
pub fn refresh_profiles(state: &AppState, cfg: &EngineConfig) -> Vec<ProfileUpdate> {
    let mut by_driver: HashMap<Uuid, Vec<DailyOrder>> = HashMap::new();
    for entry in state.orders.iter() {
        let order = entry.value();
        if order.status == OrderStatus::Completed {
            if let Some(driver_id) = order.driver_id {
                by_driver.entry(driver_id).or_default().push(order.clone());
            }
        }
    }

    let mut driver_ids: Vec<Uuid> = state.drivers.iter().map(|e| *e.key()).collect();
    driver_ids.sort();

    let mut updates = Vec::new();
    for driver_id in driver_ids {
        let history = by_driver.remove(&driver_id).unwrap_or_default();
        let Some(derived) = derive_profile(&history, cfg, Utc::now()) else {
            continue;
        };

        let Some(mut driver) = state.drivers.get_mut(&driver_id) else {
            continue;
        };

        let primary_region = derived.region_profile.primary_region.clone();
        driver.distance_stats = derived.distance_stats;
        driver.region_profile = Some(derived.region_profile);
        // Merge: an empty derivation never wipes an earlier operating point.
        if derived.typical_location.is_some() {
            driver.typical_location = derived.typical_location;
        }
        driver.updated_at = Utc::now();

        info!(
            driver_id = %driver_id,
            orders = history.len(),
            primary_region = primary_region.as_deref().unwrap_or("none"),
            "driver profile refreshed"
        );

        updates.push(ProfileUpdate {
            driver_id,
            driver_name: driver.name.clone(),
            orders_considered: history.len(),
            primary_region,
        });
    }

    updates
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Utc};
    use uuid::Uuid;

    use super::derive_profile;
    use crate::config::EngineConfig;
    use crate::models::order::{DailyOrder, GeoPoint, OrderStatus};

    fn completed(seed: u128, pickup_addr: &str, dropoff_addr: &str) -> DailyOrder {
        DailyOrder {
            id: Uuid::from_u128(seed),
            external_id: format!("MKT-{seed}"),
            order_date: NaiveDate::from_ymd_opt(2025, 10, 20).unwrap(),
            pickup_address: pickup_addr.to_string(),
            pickup_coords: None,
            pickup_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            dropoff_address: dropoff_addr.to_string(),
            dropoff_coords: None,
            dropoff_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            status: OrderStatus::Completed,
            driver_id: Some(Uuid::from_u128(1)),
            driver_name: Some("driver-1".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_history_yields_nothing() {
        let cfg = EngineConfig::default();
        assert!(derive_profile(&[], &cfg, Utc::now()).is_none());
    }

    #[test]
    fn dominant_state_with_anchor_city_becomes_primary_region() {
        let cfg = EngineConfig::default();
        let orders = vec![
            completed(1, "Fredericksburg, VA 22401", "Stafford, VA 22554"),
            completed(2, "Fredericksburg, VA 22401", "Fredericksburg, VA 22405"),
            completed(3, "Richmond, VA 23220", "Fredericksburg, VA 22401"),
        ];

        let derived = derive_profile(&orders, &cfg, Utc::now()).unwrap();
        assert_eq!(derived.region_profile.primary_region.as_deref(), Some("VA"));
        assert_eq!(derived.region_profile.top_states[0].0, "VA");
        assert_eq!(derived.region_profile.top_cities[0].0, "Fredericksburg");
    }

    #[test]
    fn split_history_has_no_primary_region() {
        let cfg = EngineConfig::default();
        let orders = vec![
            completed(1, "Fredericksburg, VA 22401", "Bethesda, MD 20814"),
            completed(2, "Baltimore, MD 21201", "Fredericksburg, VA 22401"),
        ];

        let derived = derive_profile(&orders, &cfg, Utc::now()).unwrap();
        assert!(derived.region_profile.primary_region.is_none());
        assert_eq!(derived.distance_stats.cross_state_percentage, 100.0);
    }

    #[test]
    fn distance_stats_track_long_legs() {
        let cfg = EngineConfig::default();
        // Same zip (3 km) and cross-state heuristic (120 km).
        let orders = vec![
            completed(1, "Fredericksburg, VA 22401", "Fredericksburg, VA 22401"),
            completed(2, "Fredericksburg, VA 22401", "Bethesda, MD 20814"),
        ];

        let derived = derive_profile(&orders, &cfg, Utc::now()).unwrap();
        assert_eq!(derived.distance_stats.max_distance_km, 120.0);
        assert_eq!(derived.distance_stats.long_distance_percentage, 50.0);
        assert!((derived.distance_stats.avg_distance_km - 61.5).abs() < 1e-9);
    }

    #[test]
    fn centroid_comes_from_known_coordinates() {
        let cfg = EngineConfig::default();
        let mut order = completed(1, "Fredericksburg, VA 22401", "Stafford, VA 22554");
        order.pickup_coords = Some(GeoPoint { lat: 38.0, lng: -77.0 });
        order.dropoff_coords = Some(GeoPoint { lat: 39.0, lng: -78.0 });

        let derived = derive_profile(&[order], &cfg, Utc::now()).unwrap();
        let centroid = derived.typical_location.unwrap();
        assert!((centroid.lat - 38.5).abs() < 1e-9);
        assert!((centroid.lng + 77.5).abs() < 1e-9);
    }
}
