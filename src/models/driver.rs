use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::GeoPoint;
use crate::models::profile::RegionProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Active,
    OnLeave,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Shift {
    #[default]
    AllDay,
    Morning,
    Evening,
}

/// Typed replacement for the legacy free-form `special_notes` /
/// `assignment_preferences` bags. Validated at roster import, read by the
/// scorer, never written by the feedback updater.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverPreferences {
    #[serde(default)]
    pub preferred_areas: Vec<String>,
    /// Region name -> rank, 1 = most preferred.
    #[serde(default)]
    pub region_priorities: BTreeMap<String, u32>,
    #[serde(default)]
    pub avoid_regions: Vec<String>,
    #[serde(default)]
    pub avoid_long_distance: bool,
    #[serde(default)]
    pub preferred_shift: Shift,
}

/// Derived from completed-order history by the feedback updater.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistanceStats {
    pub avg_distance_km: f64,
    pub max_distance_km: f64,
    pub long_distance_percentage: f64,
    pub cross_state_percentage: f64,
}

/// Compact record of one confirmed daily chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRecord {
    pub date: NaiveDate,
    pub stop_count: usize,
    pub time_label: String,
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    #[serde(default = "default_language")]
    pub preferred_language: String,
    pub status: DriverStatus,
    pub working_days: HashSet<Weekday>,
    #[serde(default = "default_max_orders")]
    pub max_orders_per_day: u32,
    #[serde(default)]
    pub can_do_long_distance: bool,
    #[serde(default)]
    pub early_morning_eligible: bool,
    /// 1 = most reliable .. 4 = least. Unknown drivers start at 4.
    #[serde(default = "default_reliability_tier")]
    pub reliability_tier: u8,
    #[serde(default)]
    pub is_top_dasher: bool,
    /// Flexible overflow driver; fills up last.
    #[serde(default)]
    pub is_joker_driver: bool,
    #[serde(default)]
    pub preferences: DriverPreferences,
    #[serde(default)]
    pub distance_stats: DistanceStats,
    #[serde(default)]
    pub region_profile: Option<RegionProfile>,
    /// Centroid of historical stops; the scorer's distance origin when the
    /// driver holds no prior stop in the day.
    #[serde(default)]
    pub typical_location: Option<GeoPoint>,
    #[serde(default)]
    pub chain_history: Vec<ChainRecord>,
    pub updated_at: DateTime<Utc>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_max_orders() -> u32 {
    5
}

fn default_reliability_tier() -> u8 {
    4
}

impl Driver {
    pub fn works_on(&self, day: Weekday) -> bool {
        self.working_days.contains(&day)
    }
}
