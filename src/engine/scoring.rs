use chrono::NaiveTime;

use crate::config::EngineConfig;
use crate::engine::eligibility::touches_avoided_region;
use crate::engine::{OrderContext, ScheduledStop, estimate_km};
use crate::geo::{haversine_km, heuristic_km, parse_address, travel_minutes};
use crate::models::assignment::ScoreBreakdown;
use crate::models::driver::{Driver, Shift};

/// Weighted multi-term scorer. Strictly higher = more desirable; `None`
/// means the candidate is hard-gated (time infeasible or early-morning
/// ineligible), never merely penalized.
pub struct Scorer<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> Scorer<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    pub fn score(
        &self,
        ctx: &OrderContext,
        driver: &Driver,
        load: u32,
        schedule: &[ScheduledStop],
    ) -> Option<(f64, ScoreBreakdown)> {
        let early = ctx.order.pickup_time < self.cfg.early_morning_cutoff;
        if early && !driver.early_morning_eligible {
            return None;
        }

        if !self.fits_schedule(ctx, schedule) {
            return None;
        }

        let breakdown = ScoreBreakdown {
            region_score: self.region_score(ctx, driver),
            distance_score: self.distance_score(ctx, driver, previous_stop(ctx, schedule)),
            fairness_score: self.fairness_score(driver, load),
            idle_gap_score: self.idle_gap_score(ctx, schedule),
            early_morning_score: if early {
                self.early_morning_bonus(driver)
            } else {
                0.0
            },
            shift_score: self.shift_score(ctx, driver),
            top_dasher_score: if driver.is_top_dasher {
                self.cfg.weights.top_dasher_bonus
            } else {
                0.0
            },
        };

        Some((breakdown.total(), breakdown))
    }

    /// Transition-buffer feasibility against both schedule neighbors:
    /// `dropoff + buffer + travel <= pickup` must hold into and out of the
    /// candidate order.
    fn fits_schedule(&self, ctx: &OrderContext, schedule: &[ScheduledStop]) -> bool {
        let (start, end) = ctx.order.service_span();
        let buffer = self.cfg.transition_buffer_minutes;
        let idx = schedule.partition_point(|stop| stop.start <= start);

        if let Some(prev) = idx.checked_sub(1).map(|i| &schedule[i]) {
            let travel = travel_minutes(
                estimate_km(
                    prev.dropoff_coords.as_ref(),
                    &prev.dropoff_parts,
                    ctx.order.pickup_coords.as_ref(),
                    &ctx.pickup_parts,
                ),
                self.cfg.average_speed_kmh,
            );
            if start.signed_duration_since(prev.end).num_minutes() < buffer + travel {
                return false;
            }
        }

        if let Some(next) = schedule.get(idx) {
            let travel = travel_minutes(
                estimate_km(
                    ctx.order.dropoff_coords.as_ref(),
                    &ctx.dropoff_parts,
                    next.pickup_coords.as_ref(),
                    &next.pickup_parts,
                ),
                self.cfg.average_speed_kmh,
            );
            if next.start.signed_duration_since(end).num_minutes() < buffer + travel {
                return false;
            }
        }

        true
    }

    fn region_score(&self, ctx: &OrderContext, driver: &Driver) -> f64 {
        let weights = &self.cfg.weights;
        let prefs = &driver.preferences;
        let regions = ctx.regions();

        let mut score = 0.0;

        let best_rank = prefs
            .region_priorities
            .iter()
            .filter(|(name, _)| regions.iter().any(|r| r.eq_ignore_ascii_case(name)))
            .map(|(_, rank)| (*rank).max(1))
            .min();

        if let Some(rank) = best_rank {
            let k = weights.region_rank_constant;
            score = weights.region * (k / f64::from(rank)) / k;
        } else if prefs.region_priorities.is_empty()
            && driver.region_profile.as_ref().is_some_and(|profile| {
                profile.matches(
                    ctx.pickup_parts.city.as_deref(),
                    ctx.pickup_parts.state.as_deref(),
                )
            })
        {
            // Derived profile stands in for an explicit rank-1 preference.
            score = weights.region;
        } else if prefs
            .preferred_areas
            .iter()
            .any(|area| regions.iter().any(|r| r.eq_ignore_ascii_case(area)))
        {
            score = weights.region * weights.preferred_area_fraction;
        }

        if !self.cfg.region_avoidance_is_hard && touches_avoided_region(ctx, driver) {
            score -= weights.region * 0.5;
        }

        score
    }

    fn distance_score(
        &self,
        ctx: &OrderContext,
        driver: &Driver,
        prev: Option<&ScheduledStop>,
    ) -> f64 {
        let weights = &self.cfg.weights;
        let km = self.origin_km(ctx, driver, prev);
        let mut score = weights.distance / (1.0 + km);

        if km > self.cfg.long_distance_threshold_km {
            // Capability present: steep penalty rather than exclusion.
            score -= weights.distance * 0.5;
            if driver.preferences.avoid_long_distance {
                score -= weights.distance * 0.25;
            }
        }

        if !self.cfg.long_distance_is_hard
            && ctx.is_long_distance(self.cfg.long_distance_threshold_km)
            && !driver.can_do_long_distance
        {
            score -= weights.distance;
        }

        score
    }

    /// Distance origin: prior stop in the day's schedule, else the
    /// driver's typical operating point, else the address-token heuristic
    /// against the first preferred area.
    fn origin_km(&self, ctx: &OrderContext, driver: &Driver, prev: Option<&ScheduledStop>) -> f64 {
        if let Some(prev) = prev {
            return estimate_km(
                prev.dropoff_coords.as_ref(),
                &prev.dropoff_parts,
                ctx.order.pickup_coords.as_ref(),
                &ctx.pickup_parts,
            );
        }

        if let (Some(home), Some(pickup)) =
            (driver.typical_location.as_ref(), ctx.order.pickup_coords.as_ref())
        {
            return haversine_km(home, pickup);
        }

        let home_parts = driver
            .preferences
            .preferred_areas
            .first()
            .map(|area| parse_address(area))
            .unwrap_or_default();
        heuristic_km(&home_parts, &ctx.pickup_parts)
    }

    fn fairness_score(&self, driver: &Driver, load: u32) -> f64 {
        let cap = f64::from(driver.max_orders_per_day.max(1));
        let mut score = self.cfg.weights.fairness * (1.0 - f64::from(load) / cap);
        if driver.is_joker_driver {
            // Overflow drivers fill last.
            score *= 0.5;
        }
        score.max(0.0)
    }

    fn idle_gap_score(&self, ctx: &OrderContext, schedule: &[ScheduledStop]) -> f64 {
        let (pickup, _) = ctx.order.service_span();
        for pair in schedule.windows(2) {
            let gap = pair[1].start.signed_duration_since(pair[0].end).num_minutes();
            if gap >= self.cfg.idle_gap_minutes && pair[0].end <= pickup && pickup <= pair[1].start
            {
                return self.cfg.weights.idle_gap;
            }
        }
        0.0
    }

    fn early_morning_bonus(&self, driver: &Driver) -> f64 {
        let tier = i64::from(driver.reliability_tier.clamp(1, 4));
        self.cfg.weights.early_morning * (5 - tier) as f64 / 4.0
    }

    fn shift_score(&self, ctx: &OrderContext, driver: &Driver) -> f64 {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN);
        let mismatch = match driver.preferences.preferred_shift {
            Shift::AllDay => false,
            Shift::Morning => ctx.order.pickup_time >= noon,
            Shift::Evening => ctx.order.pickup_time < noon,
        };
        if mismatch {
            -self.cfg.weights.shift_mismatch_penalty
        } else {
            0.0
        }
    }
}

fn previous_stop<'s>(ctx: &OrderContext, schedule: &'s [ScheduledStop]) -> Option<&'s ScheduledStop> {
    let (start, _) = ctx.order.service_span();
    let idx = schedule.partition_point(|stop| stop.start <= start);
    idx.checked_sub(1).map(|i| &schedule[i])
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{NaiveDate, NaiveTime, Utc, Weekday};
    use uuid::Uuid;

    use super::Scorer;
    use crate::config::EngineConfig;
    use crate::engine::{OrderContext, ScheduledStop};
    use crate::models::driver::{Driver, DriverStatus, Shift};
    use crate::models::order::{DailyOrder, GeoPoint, OrderStatus};

    fn driver(seed: u128) -> Driver {
        Driver {
            id: Uuid::from_u128(seed),
            name: format!("driver-{seed}"),
            phone: "+15405550100".to_string(),
            preferred_language: "en".to_string(),
            status: DriverStatus::Active,
            working_days: HashSet::from([Weekday::Mon]),
            max_orders_per_day: 4,
            can_do_long_distance: true,
            early_morning_eligible: false,
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

    fn ctx_at(pickup: &str, dropoff: &str, pickup_addr: &str, dropoff_addr: &str) -> OrderContext {
        OrderContext::new(DailyOrder {
            id: Uuid::from_u128(50),
            external_id: "MKT-50".to_string(),
            order_date: NaiveDate::from_ymd_opt(2025, 10, 20).unwrap(),
            pickup_address: pickup_addr.to_string(),
            pickup_coords: None,
            pickup_time: NaiveTime::parse_from_str(pickup, "%H:%M").unwrap(),
            dropoff_address: dropoff_addr.to_string(),
            dropoff_coords: None,
            dropoff_time: NaiveTime::parse_from_str(dropoff, "%H:%M").unwrap(),
            status: OrderStatus::Fetched,
            driver_id: None,
            driver_name: None,
            created_at: Utc::now(),
        })
    }

    fn fredericksburg_ctx(pickup: &str, dropoff: &str) -> OrderContext {
        ctx_at(
            pickup,
            dropoff,
            "1 Caroline St, Fredericksburg, VA 22401",
            "9 Lafayette Blvd, Fredericksburg, VA 22401",
        )
    }

    #[test]
    fn ranked_region_beats_preferred_area() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let ctx = fredericksburg_ctx("09:00", "09:45");

        let mut ranked = driver(1);
        ranked
            .preferences
            .region_priorities
            .insert("Fredericksburg".to_string(), 1);

        let mut preferred = driver(2);
        preferred.preferences.preferred_areas = vec!["Fredericksburg".to_string()];

        let (ranked_score, ranked_bd) = scorer.score(&ctx, &ranked, 0, &[]).unwrap();
        let (preferred_score, preferred_bd) = scorer.score(&ctx, &preferred, 0, &[]).unwrap();

        assert!(ranked_bd.region_score > preferred_bd.region_score);
        assert!(ranked_score > preferred_score);
    }

    #[test]
    fn lower_rank_number_scores_higher() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let ctx = fredericksburg_ctx("09:00", "09:45");

        let mut rank_one = driver(1);
        rank_one
            .preferences
            .region_priorities
            .insert("Fredericksburg".to_string(), 1);

        let mut rank_three = driver(2);
        rank_three
            .preferences
            .region_priorities
            .insert("Fredericksburg".to_string(), 3);

        let (_, one) = scorer.score(&ctx, &rank_one, 0, &[]).unwrap();
        let (_, three) = scorer.score(&ctx, &rank_three, 0, &[]).unwrap();
        assert!(one.region_score > three.region_score);
        assert!((one.region_score - cfg.weights.region).abs() < 1e-9);
    }

    #[test]
    fn derived_profile_substitutes_for_missing_priorities() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let ctx = fredericksburg_ctx("09:00", "09:45");

        let mut profiled = driver(1);
        profiled.region_profile = Some(crate::models::profile::RegionProfile {
            primary_region: Some("Fredericksburg".to_string()),
            top_cities: vec![("Fredericksburg".to_string(), 10)],
            top_states: vec![("VA".to_string(), 10)],
            top_zip_codes: Vec::new(),
            state_share: Default::default(),
            computed_at: Utc::now(),
        });

        let (_, bd) = scorer.score(&ctx, &profiled, 0, &[]).unwrap();
        assert!((bd.region_score - cfg.weights.region).abs() < 1e-9);
    }

    #[test]
    fn closer_origin_scores_higher() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let mut ctx = fredericksburg_ctx("09:00", "09:45");
        ctx.order.pickup_coords = Some(GeoPoint {
            lat: 38.3032,
            lng: -77.4605,
        });

        let mut near = driver(1);
        near.typical_location = Some(GeoPoint {
            lat: 38.31,
            lng: -77.46,
        });
        let mut far = driver(2);
        far.typical_location = Some(GeoPoint {
            lat: 38.95,
            lng: -77.35,
        });

        let (near_score, _) = scorer.score(&ctx, &near, 0, &[]).unwrap();
        let (far_score, _) = scorer.score(&ctx, &far, 0, &[]).unwrap();
        assert!(near_score > far_score);
    }

    #[test]
    fn lightly_loaded_driver_scores_higher() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let ctx = fredericksburg_ctx("09:00", "09:45");
        let d = driver(1);

        let (light, _) = scorer.score(&ctx, &d, 0, &[]).unwrap();
        let (heavy, _) = scorer.score(&ctx, &d, 3, &[]).unwrap();
        assert!(light > heavy);
    }

    #[test]
    fn joker_driver_fairness_is_dampened() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let ctx = fredericksburg_ctx("09:00", "09:45");

        let regular = driver(1);
        let mut joker = driver(2);
        joker.is_joker_driver = true;

        let (_, regular_bd) = scorer.score(&ctx, &regular, 0, &[]).unwrap();
        let (_, joker_bd) = scorer.score(&ctx, &joker, 0, &[]).unwrap();
        assert!(joker_bd.fairness_score < regular_bd.fairness_score);
    }

    #[test]
    fn transition_buffer_gates_tight_back_to_back_stops() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let d = driver(1);

        // Committed stop ends 09:05 in Fredericksburg; the Reston pickup
        // at 09:15 is 60+ km and far inside buffer + travel.
        let committed = fredericksburg_ctx("09:00", "09:05");
        let schedule = vec![ScheduledStop::from(&committed)];

        let reston = ctx_at(
            "09:15",
            "10:00",
            "11900 Market St, Reston, VA 20190",
            "2000 Town Ctr, Reston, VA 20190",
        );
        assert!(scorer.score(&reston, &d, 1, &schedule).is_none());

        // The same stop late in the afternoon is fine.
        let late = ctx_at(
            "15:00",
            "15:45",
            "11900 Market St, Reston, VA 20190",
            "2000 Town Ctr, Reston, VA 20190",
        );
        assert!(scorer.score(&late, &d, 1, &schedule).is_some());
    }

    #[test]
    fn feasibility_checks_the_following_stop_too() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let d = driver(1);

        let committed = fredericksburg_ctx("10:00", "10:30");
        let schedule = vec![ScheduledStop::from(&committed)];

        // Candidate ends at 09:50; the 10:00 committed pickup cannot be
        // reached with a 45 minute buffer.
        let before = fredericksburg_ctx("09:00", "09:50");
        assert!(scorer.score(&before, &d, 1, &schedule).is_none());
    }

    #[test]
    fn early_morning_requires_eligibility_and_rewards_reliability() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let ctx = fredericksburg_ctx("06:00", "06:45");

        let ineligible = driver(1);
        assert!(scorer.score(&ctx, &ineligible, 0, &[]).is_none());

        let mut tier_one = driver(2);
        tier_one.early_morning_eligible = true;
        tier_one.reliability_tier = 1;

        let mut tier_four = driver(3);
        tier_four.early_morning_eligible = true;
        tier_four.reliability_tier = 4;

        let (_, one) = scorer.score(&ctx, &tier_one, 0, &[]).unwrap();
        let (_, four) = scorer.score(&ctx, &tier_four, 0, &[]).unwrap();
        assert!(one.early_morning_score > four.early_morning_score);
        assert!(four.early_morning_score > 0.0);
    }

    #[test]
    fn idle_gap_fill_earns_the_bonus() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let d = driver(1);

        let morning = fredericksburg_ctx("08:00", "08:30");
        let evening = fredericksburg_ctx("17:00", "17:30");
        let mut schedule = Vec::new();
        crate::engine::insert_stop(&mut schedule, ScheduledStop::from(&morning));
        crate::engine::insert_stop(&mut schedule, ScheduledStop::from(&evening));

        let midday = fredericksburg_ctx("12:00", "12:30");
        let (_, bd) = scorer.score(&midday, &d, 2, &schedule).unwrap();
        assert!((bd.idle_gap_score - cfg.weights.idle_gap).abs() < 1e-9);
    }

    #[test]
    fn shift_mismatch_is_penalized() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);
        let afternoon = fredericksburg_ctx("14:00", "14:30");

        let mut morning_driver = driver(1);
        morning_driver.preferences.preferred_shift = Shift::Morning;

        let (_, bd) = scorer.score(&afternoon, &morning_driver, 0, &[]).unwrap();
        assert!(bd.shift_score < 0.0);
    }

    #[test]
    fn long_leg_takes_a_steep_penalty_instead_of_exclusion() {
        let cfg = EngineConfig::default();
        let scorer = Scorer::new(&cfg);

        // No schedule, no typical location, no preferred areas: the origin
        // falls back to the heuristic and a cross-state pickup reads far.
        let d = driver(1);
        let ctx = ctx_at(
            "09:00",
            "10:30",
            "Bethesda, MD 20814",
            "Silver Spring, MD 20901",
        );
        let (_, bd) = scorer.score(&ctx, &d, 0, &[]).unwrap();
        assert!(bd.distance_score < 0.0);
    }
}
