use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::chain::build_chain;
use crate::engine::eligibility::{eligible_drivers, is_eligible};
use crate::engine::scoring::Scorer;
use crate::engine::{LoadMap, OrderContext, ScheduleMap, ScheduledStop, insert_stop};
use crate::error::AppError;
use crate::models::assignment::{
    Assignment, AssignmentPass, ChainIssue, DistanceSummary, DriverLoad, RunOutcome, RunSummary,
    ScoreBreakdown, UnassignedOrder, UnassignedReason,
};
use crate::models::driver::Driver;
use crate::models::order::OrderStatus;
use crate::notify::AssignmentNotice;
use crate::state::AppState;

#[derive(Debug, Clone)]
struct DraftAssignment {
    order_id: Uuid,
    driver_id: Uuid,
    score: f64,
    breakdown: ScoreBreakdown,
    pass: AssignmentPass,
}

/// Mutable working state threaded through both passes. Later orders see
/// every earlier commitment through `load` and `schedules`.
#[derive(Debug, Default)]
struct RunState {
    load: LoadMap,
    schedules: ScheduleMap,
    drafts: Vec<DraftAssignment>,
    unassigned: Vec<UnassignedOrder>,
}

impl RunState {
    fn load_of(&self, driver_id: Uuid) -> u32 {
        self.load.get(&driver_id).copied().unwrap_or(0)
    }

    fn schedule_of(&self, driver_id: Uuid) -> &[ScheduledStop] {
        self.schedules
            .get(&driver_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn commit(&mut self, ctx: &OrderContext, driver_id: Uuid, score: f64, breakdown: ScoreBreakdown, pass: AssignmentPass) {
        self.drafts.push(DraftAssignment {
            order_id: ctx.order.id,
            driver_id,
            score,
            breakdown,
            pass,
        });
        *self.load.entry(driver_id).or_insert(0) += 1;
        insert_stop(
            self.schedules.entry(driver_id).or_default(),
            ScheduledStop::from(ctx),
        );
    }

    fn mark_unassigned(&mut self, ctx: &OrderContext, reason: UnassignedReason) {
        self.unassigned.push(UnassignedOrder {
            order_id: ctx.order.id,
            external_id: ctx.order.external_id.clone(),
            pickup_time: ctx.order.pickup_time,
            reason,
        });
    }
}

/// Pass 1: earliest pickups are the most time-constrained and are placed
/// first; each commitment is visible to every later order.
fn greedy_pass(contexts: &[OrderContext], roster: &[Driver], state: &mut RunState, cfg: &EngineConfig) {
    let scorer = Scorer::new(cfg);

    for ctx in contexts {
        let eligible = eligible_drivers(ctx, roster, &state.load, cfg);
        if eligible.is_empty() {
            state.mark_unassigned(ctx, UnassignedReason::NoEligibleDriver);
            continue;
        }

        let mut best: Option<(&Driver, u32, f64, ScoreBreakdown)> = None;
        for driver in eligible {
            let load = state.load_of(driver.id);
            let Some((score, breakdown)) = scorer.score(ctx, driver, load, state.schedule_of(driver.id))
            else {
                continue;
            };

            let wins = match &best {
                None => true,
                Some((current, current_load, current_score, _)) => {
                    match score.total_cmp(current_score) {
                        std::cmp::Ordering::Greater => true,
                        std::cmp::Ordering::Less => false,
                        // Deterministic tie-break: fewer assignments, then
                        // lower driver id.
                        std::cmp::Ordering::Equal => {
                            load < *current_load || (load == *current_load && driver.id < current.id)
                        }
                    }
                }
            };
            if wins {
                best = Some((driver, load, score, breakdown));
            }
        }

        match best {
            Some((driver, _, score, breakdown)) => {
                state.commit(ctx, driver.id, score, breakdown, AssignmentPass::Greedy);
            }
            None => state.mark_unassigned(ctx, UnassignedReason::NoFeasibleCandidate),
        }
    }
}

/// Pass 2: move orders from drivers at their cap to drivers holding 0 or 1
/// when the receiver is still hard-eligible and the score delta stays
/// within tolerance. Only moves, never unassigns, so the pending count can
/// never grow.
fn rebalance_pass(
    contexts: &HashMap<Uuid, &OrderContext>,
    roster: &[Driver],
    state: &mut RunState,
    cfg: &EngineConfig,
) -> usize {
    let scorer = Scorer::new(cfg);
    let mut moves = 0;

    'scan: loop {
        for donor in roster {
            let donor_load = state.load_of(donor.id);
            if donor_load == 0 || donor_load < donor.max_orders_per_day {
                continue;
            }

            // Latest pickup first: the least anchored commitment moves.
            let mut donor_drafts: Vec<usize> = (0..state.drafts.len())
                .filter(|&i| state.drafts[i].driver_id == donor.id)
                .collect();
            donor_drafts.sort_by(|&a, &b| {
                let ka = &contexts[&state.drafts[a].order_id].order;
                let kb = &contexts[&state.drafts[b].order_id].order;
                (kb.pickup_time, &kb.external_id).cmp(&(ka.pickup_time, &ka.external_id))
            });

            let mut receivers: Vec<&Driver> = roster
                .iter()
                .filter(|r| r.id != donor.id && state.load_of(r.id) <= 1)
                .collect();
            receivers.sort_by_key(|r| (state.load_of(r.id), r.id));

            for draft_idx in donor_drafts {
                let draft = state.drafts[draft_idx].clone();
                let ctx = contexts[&draft.order_id];

                for receiver in &receivers {
                    let receiver_load = state.load_of(receiver.id);
                    // A move must actually flatten the distribution.
                    if donor_load <= receiver_load + 1 {
                        continue;
                    }
                    if !is_eligible(ctx, receiver, receiver_load, cfg) {
                        continue;
                    }
                    let Some((score, breakdown)) =
                        scorer.score(ctx, receiver, receiver_load, state.schedule_of(receiver.id))
                    else {
                        continue;
                    };
                    if score < draft.score - cfg.rebalance_tolerance {
                        continue;
                    }

                    if let Some(schedule) = state.schedules.get_mut(&donor.id) {
                        schedule.retain(|stop| stop.order_id != draft.order_id);
                    }
                    insert_stop(
                        state.schedules.entry(receiver.id).or_default(),
                        ScheduledStop::from(ctx),
                    );
                    *state.load.entry(donor.id).or_insert(1) -= 1;
                    *state.load.entry(receiver.id).or_insert(0) += 1;
                    state.drafts[draft_idx] = DraftAssignment {
                        order_id: draft.order_id,
                        driver_id: receiver.id,
                        score,
                        breakdown,
                        pass: AssignmentPass::Rebalance,
                    };
                    moves += 1;
                    // Loads changed; rescan from the top.
                    continue 'scan;
                }
            }
        }
        break;
    }

    moves
}

struct RunGuard<'a> {
    state: &'a AppState,
    date: NaiveDate,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.running_dates.remove(&self.date);
    }
}

/// One full engine invocation for one date. Deterministic for identical
/// driver/order state: same snapshot, same assignment map.
pub async fn run_for_date(
    state: &Arc<AppState>,
    date: NaiveDate,
    cfg: EngineConfig,
) -> Result<RunOutcome, AppError> {
    // Fatal before any commitment.
    cfg.validate()?;

    if state.running_dates.insert(date, ()).is_some() {
        return Err(AppError::Conflict(format!(
            "dispatch run already in progress for {date}"
        )));
    }
    let _guard = RunGuard {
        state: state.as_ref(),
        date,
    };

    let started = Instant::now();
    let result = execute(state, date, &cfg).await;
    let elapsed = started.elapsed().as_secs_f64();

    match &result {
        Ok(outcome) => {
            state
                .metrics
                .run_duration_seconds
                .with_label_values(&["success"])
                .observe(elapsed);
            state.metrics.runs_total.with_label_values(&["success"]).inc();
            info!(
                date = %date,
                assigned = outcome.summary.assigned,
                unassigned = outcome.summary.unassigned,
                "dispatch run finished"
            );
        }
        Err(err) => {
            state
                .metrics
                .run_duration_seconds
                .with_label_values(&["error"])
                .observe(elapsed);
            state.metrics.runs_total.with_label_values(&["error"]).inc();
            warn!(date = %date, error = %err, "dispatch run failed");
        }
    }

    result
}

async fn execute(
    state: &Arc<AppState>,
    date: NaiveDate,
    cfg: &EngineConfig,
) -> Result<RunOutcome, AppError> {
    // Fresh snapshots per run; nothing is carried between invocations.
    let mut roster: Vec<Driver> = state.drivers.iter().map(|e| e.value().clone()).collect();
    roster.sort_by_key(|d| d.id);

    let mut day_orders: Vec<_> = state
        .orders
        .iter()
        .filter(|e| e.value().order_date == date)
        .map(|e| e.value().clone())
        .collect();
    day_orders.sort_by(|a, b| {
        (a.pickup_time, &a.external_id, a.id).cmp(&(b.pickup_time, &b.external_id, b.id))
    });

    let mut geocode_failures = 0usize;
    let mut run_state = RunState::default();
    let mut contexts: Vec<OrderContext> = Vec::new();

    for mut order in day_orders {
        for (address, coords) in [
            (order.pickup_address.clone(), &mut order.pickup_coords),
            (order.dropoff_address.clone(), &mut order.dropoff_coords),
        ] {
            if coords.is_none() {
                match state.geocoder.resolve(&address).await {
                    Some(point) => *coords = Some(point),
                    None => geocode_failures += 1,
                }
            }
        }

        match order.status {
            OrderStatus::Fetched => contexts.push(OrderContext::new(order)),
            // Pre-existing commitments for the date count toward load and
            // occupy schedule slots, but are never re-planned.
            OrderStatus::Assigned | OrderStatus::Completed => {
                if let Some(driver_id) = order.driver_id {
                    let ctx = OrderContext::new(order);
                    *run_state.load.entry(driver_id).or_insert(0) += 1;
                    insert_stop(
                        run_state.schedules.entry(driver_id).or_default(),
                        ScheduledStop::from(&ctx),
                    );
                }
            }
        }
    }

    greedy_pass(&contexts, &roster, &mut run_state, cfg);

    let by_id: HashMap<Uuid, &OrderContext> =
        contexts.iter().map(|ctx| (ctx.order.id, ctx)).collect();
    let moves = rebalance_pass(&by_id, &roster, &mut run_state, cfg);
    if moves > 0 {
        info!(date = %date, moves, "fairness rebalance moved orders");
    }

    let RunState {
        load,
        schedules: _,
        drafts,
        mut unassigned,
    } = run_state;

    let names: HashMap<Uuid, &Driver> = roster.iter().map(|d| (d.id, d)).collect();
    let mut assignments: Vec<Assignment> = Vec::with_capacity(drafts.len());
    let mut committed_ctx: Vec<&OrderContext> = Vec::new();
    let mut load = load;
    let mut conflict_skipped = 0usize;
    let mut idle_gap_fills = 0usize;

    for draft in drafts {
        let ctx = by_id[&draft.order_id];
        let Some(driver) = names.get(&draft.driver_id) else {
            continue;
        };

        // Re-check immediately before commit; never overwrite a concurrent
        // assignment.
        let committed = match state.orders.get_mut(&draft.order_id) {
            Some(mut entry) => {
                if entry.status == OrderStatus::Fetched && entry.driver_id.is_none() {
                    entry.status = OrderStatus::Assigned;
                    entry.driver_id = Some(draft.driver_id);
                    entry.driver_name = Some(driver.name.clone());
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if !committed {
            warn!(order_id = %draft.order_id, "order changed during run; skipping commit");
            conflict_skipped += 1;
            if let Some(count) = load.get_mut(&draft.driver_id) {
                *count = count.saturating_sub(1);
            }
            unassigned.push(UnassignedOrder {
                order_id: ctx.order.id,
                external_id: ctx.order.external_id.clone(),
                pickup_time: ctx.order.pickup_time,
                reason: UnassignedReason::CommitConflict,
            });
            continue;
        }

        if draft.breakdown.idle_gap_score > 0.0 {
            idle_gap_fills += 1;
        }

        let assignment = Assignment {
            id: Uuid::new_v4(),
            order_id: draft.order_id,
            driver_id: draft.driver_id,
            score: draft.score,
            score_breakdown: draft.breakdown.clone(),
            pass: draft.pass,
            assigned_at: Utc::now(),
        };
        state.metrics.orders_assigned_total.inc();

        // Notification failures never roll back a commitment; the notifier
        // task reports its own outcomes.
        let _ = state.notice_tx.send(AssignmentNotice::new(ctx, driver));

        info!(
            order_id = %assignment.order_id,
            driver_id = %assignment.driver_id,
            score = assignment.score,
            "order assigned"
        );

        committed_ctx.push(ctx);
        assignments.push(assignment);
    }

    for entry in &unassigned {
        state
            .metrics
            .orders_unassigned_total
            .with_label_values(&[entry.reason.as_label()])
            .inc();
    }

    // Chains over everything now committed to each driver for the date,
    // including pre-existing assignments.
    let mut chain_warnings: Vec<ChainIssue> = Vec::new();
    for driver in &roster {
        let assigned = load.get(&driver.id).copied().unwrap_or(0);
        if assigned == 0 {
            continue;
        }

        let driver_orders: Vec<_> = state
            .orders
            .iter()
            .filter(|e| e.value().order_date == date && e.value().driver_id == Some(driver.id))
            .map(|e| e.value().clone())
            .collect();

        let chain = build_chain(driver, date, driver_orders, cfg);
        for warning in &chain.warnings {
            warn!(
                driver_id = %driver.id,
                position = warning.position,
                shortfall_minutes = warning.shortfall_minutes,
                "chain integrity warning"
            );
            chain_warnings.push(ChainIssue {
                driver_id: driver.id,
                position: warning.position,
                message: warning.message.clone(),
            });
        }

        let regions: Vec<String> = chain
            .stops
            .iter()
            .flat_map(|stop| {
                let parts = crate::geo::parse_address(&stop.dropoff_address);
                parts.city.into_iter().chain(parts.state)
            })
            .fold(Vec::new(), |mut acc, region| {
                if !acc.iter().any(|r: &String| r.eq_ignore_ascii_case(&region)) {
                    acc.push(region);
                }
                acc
            });

        if let Some(mut stored) = state.drivers.get_mut(&driver.id) {
            // Re-running a date replaces that date's record instead of
            // stacking duplicates.
            stored.chain_history.retain(|record| record.date != date);
            stored.chain_history.push(chain.to_record(regions));
            stored.updated_at = Utc::now();
        }

        let utilization = f64::from(assigned) / f64::from(driver.max_orders_per_day.max(1));
        state
            .metrics
            .driver_utilization
            .with_label_values(&[&driver.id.to_string()])
            .set(utilization);
    }

    let mut load_distribution: Vec<DriverLoad> = roster
        .iter()
        .map(|driver| DriverLoad {
            driver_id: driver.id,
            driver_name: driver.name.clone(),
            assigned: load.get(&driver.id).copied().unwrap_or(0),
            max_orders_per_day: driver.max_orders_per_day,
        })
        .collect();
    load_distribution.sort_by_key(|entry| entry.driver_id);

    let distance = distance_summary(&committed_ctx);
    let mut unassigned_reasons: BTreeMap<String, usize> = BTreeMap::new();
    for entry in &unassigned {
        *unassigned_reasons
            .entry(entry.reason.as_label().to_string())
            .or_insert(0) += 1;
    }

    let summary = RunSummary {
        date,
        assigned: assignments.len(),
        unassigned: unassigned.len(),
        conflict_skipped,
        load_distribution,
        idle_gap_fills,
        distance,
        geocode_failures,
        chain_warnings,
        unassigned_reasons,
    };

    let outcome = RunOutcome {
        assignments,
        unassigned,
        summary,
    };
    state.runs.insert(date, outcome.clone());

    Ok(outcome)
}

fn distance_summary(committed: &[&OrderContext]) -> Option<DistanceSummary> {
    if committed.is_empty() {
        return None;
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for ctx in committed {
        min = min.min(ctx.trip_km);
        max = max.max(ctx.trip_km);
        sum += ctx.trip_km;
    }

    Some(DistanceSummary {
        min_km: min,
        mean_km: sum / committed.len() as f64,
        max_km: max,
    })
}
