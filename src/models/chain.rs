use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::ChainRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStop {
    pub order_id: Uuid,
    pub external_id: String,
    pub pickup_address: String,
    pub pickup_time: NaiveTime,
    pub dropoff_address: String,
    pub dropoff_time: NaiveTime,
    /// Estimated travel to the next stop's pickup; None for the last stop.
    pub travel_to_next_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainWarning {
    /// Index of the stop where the violation was detected.
    pub position: usize,
    pub shortfall_minutes: i64,
    pub message: String,
}

/// A driver's ordered stop sequence for one day. Recomputed from committed
/// assignments, never mutated on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub driver_id: Uuid,
    pub date: NaiveDate,
    pub stops: Vec<ChainStop>,
    pub warnings: Vec<ChainWarning>,
}

impl Chain {
    pub fn is_feasible(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Compact record appended to the driver's `chain_history` on
    /// confirmation.
    pub fn to_record(&self, regions: Vec<String>) -> ChainRecord {
        let time_label = match (self.stops.first(), self.stops.last()) {
            (Some(first), Some(last)) => format!(
                "{}-{}",
                first.pickup_time.format("%H:%M"),
                last.dropoff_time.format("%H:%M")
            ),
            _ => String::new(),
        };

        ChainRecord {
            date: self.date,
            stop_count: self.stops.len(),
            time_label,
            regions,
        }
    }
}
