use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-driver region summary derived from completed-order history.
///
/// Consumed by the scorer as the region-priority input when the driver has
/// no manually curated `region_priorities`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionProfile {
    pub primary_region: Option<String>,
    /// (name, stop count), most frequent first.
    pub top_cities: Vec<(String, usize)>,
    pub top_states: Vec<(String, usize)>,
    pub top_zip_codes: Vec<(String, usize)>,
    /// State -> fraction of stops in that state.
    pub state_share: BTreeMap<String, f64>,
    pub computed_at: DateTime<Utc>,
}

impl RegionProfile {
    pub fn matches(&self, city: Option<&str>, state: Option<&str>) -> bool {
        let Some(primary) = self.primary_region.as_deref() else {
            return false;
        };
        city.is_some_and(|c| c.eq_ignore_ascii_case(primary))
            || state.is_some_and(|s| s.eq_ignore_ascii_case(primary))
    }
}
