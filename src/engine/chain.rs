use chrono::NaiveDate;

use crate::config::EngineConfig;
use crate::engine::estimate_km;
use crate::geo::{parse_address, travel_minutes};
use crate::models::chain::{Chain, ChainStop, ChainWarning};
use crate::models::driver::Driver;
use crate::models::order::DailyOrder;

/// Orders a driver's committed orders into a stop sequence and verifies the
/// transition-buffer inequality between consecutive stops. Violations are
/// surfaced as warnings, never silently fixed: they point at an upstream
/// scoring or manual-override error.
pub fn build_chain(
    driver: &Driver,
    date: NaiveDate,
    mut orders: Vec<DailyOrder>,
    cfg: &EngineConfig,
) -> Chain {
    orders.sort_by(|a, b| {
        (a.pickup_time, &a.external_id, a.id).cmp(&(b.pickup_time, &b.external_id, b.id))
    });

    let mut warnings = Vec::new();
    let mut stops: Vec<ChainStop> = Vec::with_capacity(orders.len());

    for (position, order) in orders.iter().enumerate() {
        if order.times_out_of_order() {
            warnings.push(ChainWarning {
                position,
                shortfall_minutes: 0,
                message: format!(
                    "order {} has dropoff {} before pickup {}",
                    order.external_id, order.dropoff_time, order.pickup_time
                ),
            });
        }

        let travel_to_next_minutes = orders.get(position + 1).map(|next| {
            let from_parts = parse_address(&order.dropoff_address);
            let to_parts = parse_address(&next.pickup_address);
            travel_minutes(
                estimate_km(
                    order.dropoff_coords.as_ref(),
                    &from_parts,
                    next.pickup_coords.as_ref(),
                    &to_parts,
                ),
                cfg.average_speed_kmh,
            )
        });

        stops.push(ChainStop {
            order_id: order.id,
            external_id: order.external_id.clone(),
            pickup_address: order.pickup_address.clone(),
            pickup_time: order.pickup_time,
            dropoff_address: order.dropoff_address.clone(),
            dropoff_time: order.dropoff_time,
            travel_to_next_minutes,
        });
    }

    for position in 1..orders.len() {
        let prev = &orders[position - 1];
        let next = &orders[position];
        let (_, prev_end) = prev.service_span();
        let (next_start, _) = next.service_span();

        let travel = stops[position - 1].travel_to_next_minutes.unwrap_or(0);
        let required = cfg.transition_buffer_minutes + travel;
        let available = next_start.signed_duration_since(prev_end).num_minutes();

        if available < required {
            warnings.push(ChainWarning {
                position,
                shortfall_minutes: required - available,
                message: format!(
                    "stop {} pickup {} is {} minutes short of dropoff {} plus buffer and travel",
                    next.external_id,
                    next.pickup_time,
                    required - available,
                    prev.dropoff_time
                ),
            });
        }
    }

    Chain {
        driver_id: driver.id,
        date,
        stops,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{NaiveDate, NaiveTime, Utc, Weekday};
    use uuid::Uuid;

    use super::build_chain;
    use crate::config::EngineConfig;
    use crate::models::driver::{Driver, DriverStatus};
    use crate::models::order::{DailyOrder, OrderStatus};

    fn driver() -> Driver {
        Driver {
            id: Uuid::from_u128(1),
            name: "driver-1".to_string(),
            phone: "+15405550100".to_string(),
            preferred_language: "en".to_string(),
            status: DriverStatus::Active,
            working_days: HashSet::from([Weekday::Mon]),
            max_orders_per_day: 5,
            can_do_long_distance: true,
            early_morning_eligible: true,
            reliability_tier: 2,
            is_top_dasher: false,
            is_joker_driver: false,
            preferences: Default::default(),
            distance_stats: Default::default(),
            region_profile: None,
            typical_location: None,
            chain_history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn order(seed: u128, pickup: &str, dropoff: &str) -> DailyOrder {
        DailyOrder {
            id: Uuid::from_u128(seed),
            external_id: format!("MKT-{seed}"),
            order_date: NaiveDate::from_ymd_opt(2025, 10, 20).unwrap(),
            pickup_address: "10 Main St, Fredericksburg, VA 22401".to_string(),
            pickup_coords: None,
            pickup_time: NaiveTime::parse_from_str(pickup, "%H:%M").unwrap(),
            dropoff_address: "20 Oak St, Fredericksburg, VA 22401".to_string(),
            dropoff_coords: None,
            dropoff_time: NaiveTime::parse_from_str(dropoff, "%H:%M").unwrap(),
            status: OrderStatus::Assigned,
            driver_id: Some(Uuid::from_u128(1)),
            driver_name: Some("driver-1".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn stops_are_ordered_by_pickup_time() {
        let cfg = EngineConfig::default();
        let date = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap();
        let chain = build_chain(
            &driver(),
            date,
            vec![
                order(2, "13:00", "13:30"),
                order(1, "09:00", "09:30"),
            ],
            &cfg,
        );

        assert_eq!(chain.stops.len(), 2);
        assert_eq!(chain.stops[0].external_id, "MKT-1");
        assert!(chain.stops[0].travel_to_next_minutes.is_some());
        assert!(chain.stops[1].travel_to_next_minutes.is_none());
        assert!(chain.is_feasible());
    }

    #[test]
    fn tight_transition_is_flagged_not_fixed() {
        let cfg = EngineConfig::default();
        let date = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap();
        let chain = build_chain(
            &driver(),
            date,
            vec![
                order(1, "09:00", "09:30"),
                order(2, "09:40", "10:10"),
            ],
            &cfg,
        );

        assert_eq!(chain.stops.len(), 2);
        assert_eq!(chain.warnings.len(), 1);
        assert_eq!(chain.warnings[0].position, 1);
        assert!(chain.warnings[0].shortfall_minutes > 0);
    }

    #[test]
    fn backwards_timestamps_surface_a_warning() {
        let cfg = EngineConfig::default();
        let date = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap();
        let chain = build_chain(&driver(), date, vec![order(1, "11:00", "09:00")], &cfg);

        assert_eq!(chain.warnings.len(), 1);
        assert!(chain.warnings[0].message.contains("before pickup"));
    }

    #[test]
    fn record_carries_stop_count_and_time_label() {
        let cfg = EngineConfig::default();
        let date = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap();
        let chain = build_chain(
            &driver(),
            date,
            vec![
                order(1, "09:00", "09:30"),
                order(2, "14:00", "14:45"),
            ],
            &cfg,
        );

        let record = chain.to_record(vec!["Fredericksburg".to_string()]);
        assert_eq!(record.stop_count, 2);
        assert_eq!(record.time_label, "09:00-14:45");
        assert_eq!(record.date, date);
    }
}
