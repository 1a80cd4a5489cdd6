use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Fetched,
    Assigned,
    Completed,
}

/// One delivery obligation for one calendar day. Addresses, times and the
/// marketplace id are owned by ingestion; the engine only writes `status`,
/// `driver_id` and `driver_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyOrder {
    pub id: Uuid,
    pub external_id: String,
    pub order_date: NaiveDate,
    pub pickup_address: String,
    pub pickup_coords: Option<GeoPoint>,
    pub pickup_time: NaiveTime,
    pub dropoff_address: String,
    pub dropoff_coords: Option<GeoPoint>,
    pub dropoff_time: NaiveTime,
    pub status: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub driver_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DailyOrder {
    pub fn weekday(&self) -> Weekday {
        self.order_date.weekday()
    }

    /// Upstream does not guarantee dropoff_time >= pickup_time.
    pub fn times_out_of_order(&self) -> bool {
        self.dropoff_time < self.pickup_time
    }

    /// Pickup/dropoff times in chronological order, regardless of how they
    /// arrived from the marketplace.
    pub fn service_span(&self) -> (NaiveTime, NaiveTime) {
        if self.times_out_of_order() {
            (self.dropoff_time, self.pickup_time)
        } else {
            (self.pickup_time, self.dropoff_time)
        }
    }
}
