use std::collections::BTreeMap;
use std::env;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub geocoder_url: Option<String>,
    pub geocode_min_interval_ms: u64,
    pub batch_chunk_size: usize,
    pub batch_chunk_pause_ms: u64,
    pub engine: EngineConfig,
}

/// All scoring weights in one tunable object. Historical operation tuned
/// these iteratively, so none of them may live as module constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub region: f64,
    pub distance: f64,
    pub fairness: f64,
    pub idle_gap: f64,
    pub early_morning: f64,
    /// Constant K in the region term K / rank.
    pub region_rank_constant: f64,
    /// Fraction of the region weight granted on a preferred-area match
    /// without an explicit rank.
    pub preferred_area_fraction: f64,
    pub top_dasher_bonus: f64,
    pub shift_mismatch_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            region: 150.0,
            distance: 250.0,
            fairness: 100.0,
            idle_gap: 50.0,
            early_morning: 25.0,
            region_rank_constant: 100.0,
            preferred_area_fraction: 0.25,
            top_dasher_bonus: 5.0,
            shift_mismatch_penalty: 15.0,
        }
    }
}

/// Tuning for one engine run. Built from the environment at startup and
/// overridable per dispatch request for weight experiments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: ScoringWeights,
    pub long_distance_threshold_km: f64,
    pub transition_buffer_minutes: i64,
    pub idle_gap_minutes: i64,
    pub early_morning_cutoff: NaiveTime,
    pub average_speed_kmh: f64,
    /// Pass 2 accepts a reassignment when the receiver's score is within
    /// this tolerance of the donor's.
    pub rebalance_tolerance: f64,
    /// Policy switches for the flags whose hard/soft treatment the source
    /// signals disagree on.
    pub region_avoidance_is_hard: bool,
    pub long_distance_is_hard: bool,
    /// State -> anchor cities used by the primary-region classification.
    pub anchor_cities: BTreeMap<String, Vec<String>>,
    /// Minimum state share for a primary-region call.
    pub primary_region_share: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            long_distance_threshold_km: 25.0,
            transition_buffer_minutes: 45,
            idle_gap_minutes: 120,
            early_morning_cutoff: NaiveTime::from_hms_opt(7, 0, 0)
                .unwrap_or(NaiveTime::MIN),
            average_speed_kmh: 40.0,
            rebalance_tolerance: 0.0,
            region_avoidance_is_hard: true,
            long_distance_is_hard: true,
            anchor_cities: default_anchor_cities(),
            primary_region_share: 0.6,
        }
    }
}

fn default_anchor_cities() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "VA".to_string(),
            vec![
                "Fredericksburg".to_string(),
                "Richmond".to_string(),
                "Arlington".to_string(),
                "Reston".to_string(),
            ],
        ),
        ("DC".to_string(), vec!["Washington".to_string()]),
        (
            "MD".to_string(),
            vec!["Baltimore".to_string(), "Bethesda".to_string()],
        ),
    ])
}

impl EngineConfig {
    /// Configuration errors are fatal and must abort a run before any
    /// commitment.
    pub fn validate(&self) -> Result<(), AppError> {
        let weights = [
            ("region", self.weights.region),
            ("distance", self.weights.distance),
            ("fairness", self.weights.fairness),
            ("idle_gap", self.weights.idle_gap),
            ("early_morning", self.weights.early_morning),
            ("top_dasher_bonus", self.weights.top_dasher_bonus),
            ("shift_mismatch_penalty", self.weights.shift_mismatch_penalty),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Config(format!(
                    "weight {name} must be finite and non-negative, got {value}"
                )));
            }
        }

        if !self.weights.region_rank_constant.is_finite()
            || self.weights.region_rank_constant <= 0.0
        {
            return Err(AppError::Config(
                "region_rank_constant must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.weights.preferred_area_fraction) {
            return Err(AppError::Config(
                "preferred_area_fraction must be within 0..=1".to_string(),
            ));
        }
        if self.long_distance_threshold_km <= 0.0 {
            return Err(AppError::Config(
                "long_distance_threshold_km must be positive".to_string(),
            ));
        }
        if self.transition_buffer_minutes < 0 || self.idle_gap_minutes < 0 {
            return Err(AppError::Config(
                "buffer and idle-gap minutes must be non-negative".to_string(),
            ));
        }
        if self.average_speed_kmh <= 0.0 {
            return Err(AppError::Config(
                "average_speed_kmh must be positive".to_string(),
            ));
        }
        if !self.rebalance_tolerance.is_finite() || self.rebalance_tolerance < 0.0 {
            return Err(AppError::Config(
                "rebalance_tolerance must be finite and non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.primary_region_share) {
            return Err(AppError::Config(
                "primary_region_share must be within 0..=1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let engine = EngineConfig {
            weights: ScoringWeights {
                region: parse_or_default("REGION_WEIGHT", 150.0)?,
                distance: parse_or_default("DISTANCE_WEIGHT", 250.0)?,
                fairness: parse_or_default("FAIRNESS_WEIGHT", 100.0)?,
                idle_gap: parse_or_default("IDLE_GAP_WEIGHT", 50.0)?,
                early_morning: parse_or_default("EARLY_MORNING_WEIGHT", 25.0)?,
                region_rank_constant: parse_or_default("REGION_RANK_CONSTANT", 100.0)?,
                preferred_area_fraction: parse_or_default("PREFERRED_AREA_FRACTION", 0.25)?,
                top_dasher_bonus: parse_or_default("TOP_DASHER_BONUS", 5.0)?,
                shift_mismatch_penalty: parse_or_default("SHIFT_MISMATCH_PENALTY", 15.0)?,
            },
            long_distance_threshold_km: parse_or_default("LONG_DISTANCE_THRESHOLD_KM", 25.0)?,
            transition_buffer_minutes: parse_or_default("TRANSITION_BUFFER_MINUTES", 45)?,
            idle_gap_minutes: parse_or_default("IDLE_GAP_MINUTES", 120)?,
            early_morning_cutoff: parse_or_default(
                "EARLY_MORNING_CUTOFF",
                NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            )?,
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", 40.0)?,
            rebalance_tolerance: parse_or_default("REBALANCE_TOLERANCE", 0.0)?,
            region_avoidance_is_hard: parse_or_default("REGION_AVOIDANCE_IS_HARD", true)?,
            long_distance_is_hard: parse_or_default("LONG_DISTANCE_IS_HARD", true)?,
            anchor_cities: default_anchor_cities(),
            primary_region_share: parse_or_default("PRIMARY_REGION_SHARE", 0.6)?,
        };
        engine.validate()?;

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            geocoder_url: env::var("GEOCODER_URL").ok().filter(|url| !url.is_empty()),
            geocode_min_interval_ms: parse_or_default("GEOCODE_MIN_INTERVAL_MS", 1000)?,
            batch_chunk_size: parse_or_default("BATCH_CHUNK_SIZE", 50)?,
            batch_chunk_pause_ms: parse_or_default("BATCH_CHUNK_PAUSE_MS", 100)?,
            engine,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
