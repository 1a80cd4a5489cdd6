pub mod assignment;
pub mod chain;
pub mod eligibility;
pub mod feedback;
pub mod scoring;

use std::collections::HashMap;

use chrono::NaiveTime;
use uuid::Uuid;

use crate::geo::{AddressParts, haversine_km, heuristic_km, parse_address};
use crate::models::order::{DailyOrder, GeoPoint};

/// Per-order facts computed once per run and shared by the constraint
/// filter, the scorer and the chain builder.
#[derive(Debug, Clone)]
pub struct OrderContext {
    pub order: DailyOrder,
    pub pickup_parts: AddressParts,
    pub dropoff_parts: AddressParts,
    /// Estimated pickup-to-dropoff leg.
    pub trip_km: f64,
}

impl OrderContext {
    pub fn new(order: DailyOrder) -> Self {
        let pickup_parts = parse_address(&order.pickup_address);
        let dropoff_parts = parse_address(&order.dropoff_address);
        let trip_km = estimate_km(
            order.pickup_coords.as_ref(),
            &pickup_parts,
            order.dropoff_coords.as_ref(),
            &dropoff_parts,
        );

        Self {
            order,
            pickup_parts,
            dropoff_parts,
            trip_km,
        }
    }

    pub fn is_long_distance(&self, threshold_km: f64) -> bool {
        self.trip_km > threshold_km
    }

    /// Region names this order touches: pickup and dropoff city and state
    /// tokens, deduplicated.
    pub fn regions(&self) -> Vec<&str> {
        let mut regions: Vec<&str> = Vec::new();
        for part in [
            self.pickup_parts.city.as_deref(),
            self.pickup_parts.state.as_deref(),
            self.dropoff_parts.city.as_deref(),
            self.dropoff_parts.state.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if !regions.iter().any(|r| r.eq_ignore_ascii_case(part)) {
                regions.push(part);
            }
        }
        regions
    }
}

/// A stop already committed to a driver's in-run schedule. `start`/`end`
/// are the chronologically ordered service span, so backwards upstream
/// timestamps cannot break the feasibility math.
#[derive(Debug, Clone)]
pub struct ScheduledStop {
    pub order_id: Uuid,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub pickup_coords: Option<GeoPoint>,
    pub pickup_parts: AddressParts,
    pub dropoff_coords: Option<GeoPoint>,
    pub dropoff_parts: AddressParts,
}

impl From<&OrderContext> for ScheduledStop {
    fn from(ctx: &OrderContext) -> Self {
        let (start, end) = ctx.order.service_span();
        Self {
            order_id: ctx.order.id,
            start,
            end,
            pickup_coords: ctx.order.pickup_coords,
            pickup_parts: ctx.pickup_parts.clone(),
            dropoff_coords: ctx.order.dropoff_coords,
            dropoff_parts: ctx.dropoff_parts.clone(),
        }
    }
}

/// Orders committed per driver within the current run, kept sorted by stop
/// start time.
pub type ScheduleMap = HashMap<Uuid, Vec<ScheduledStop>>;

/// Orders counted per driver for the target date, committed earlier in the
/// run or pre-existing in the store.
pub type LoadMap = HashMap<Uuid, u32>;

pub fn insert_stop(schedule: &mut Vec<ScheduledStop>, stop: ScheduledStop) {
    let at = schedule.partition_point(|s| s.start <= stop.start);
    schedule.insert(at, stop);
}

/// Coordinate distance when both ends are resolved, address-token
/// heuristic otherwise.
pub fn estimate_km(
    from_coords: Option<&GeoPoint>,
    from_parts: &AddressParts,
    to_coords: Option<&GeoPoint>,
    to_parts: &AddressParts,
) -> f64 {
    match (from_coords, to_coords) {
        (Some(a), Some(b)) => haversine_km(a, b),
        _ => heuristic_km(from_parts, to_parts),
    }
}
