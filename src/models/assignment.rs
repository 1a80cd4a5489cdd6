use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One weighted component per soft scoring term. Hard gates never appear
/// here; a gated candidate is dropped before a breakdown exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub region_score: f64,
    pub distance_score: f64,
    pub fairness_score: f64,
    pub idle_gap_score: f64,
    pub early_morning_score: f64,
    pub shift_score: f64,
    pub top_dasher_score: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.region_score
            + self.distance_score
            + self.fairness_score
            + self.idle_gap_score
            + self.early_morning_score
            + self.shift_score
            + self.top_dasher_score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentPass {
    Greedy,
    Rebalance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub pass: AssignmentPass,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnassignedReason {
    /// Every driver failed a hard constraint.
    NoEligibleDriver,
    /// Eligible drivers existed but all were gated on time feasibility or
    /// early-morning eligibility.
    NoFeasibleCandidate,
    /// Order was no longer Fetched when the commit was attempted.
    CommitConflict,
}

impl UnassignedReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            UnassignedReason::NoEligibleDriver => "no_eligible_driver",
            UnassignedReason::NoFeasibleCandidate => "no_feasible_candidate",
            UnassignedReason::CommitConflict => "commit_conflict",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnassignedOrder {
    pub order_id: Uuid,
    pub external_id: String,
    pub pickup_time: NaiveTime,
    pub reason: UnassignedReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLoad {
    pub driver_id: Uuid,
    pub driver_name: String,
    pub assigned: u32,
    pub max_orders_per_day: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistanceSummary {
    pub min_km: f64,
    pub mean_km: f64,
    pub max_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainIssue {
    pub driver_id: Uuid,
    pub position: usize,
    pub message: String,
}

/// The diagnostics contract for one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub date: NaiveDate,
    pub assigned: usize,
    pub unassigned: usize,
    pub conflict_skipped: usize,
    /// Sorted by driver id for stable output.
    pub load_distribution: Vec<DriverLoad>,
    pub idle_gap_fills: usize,
    pub distance: Option<DistanceSummary>,
    pub geocode_failures: usize,
    pub chain_warnings: Vec<ChainIssue>,
    /// reason label -> count.
    pub unassigned_reasons: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub assignments: Vec<Assignment>,
    pub unassigned: Vec<UnassignedOrder>,
    pub summary: RunSummary,
}
