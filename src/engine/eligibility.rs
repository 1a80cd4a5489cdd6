use crate::config::EngineConfig;
use crate::engine::{LoadMap, OrderContext};
use crate::models::driver::{Driver, DriverStatus};

/// Hard-constraint check for one driver. Soft objectives never appear
/// here; anything that fails is out of candidacy entirely.
pub fn is_eligible(ctx: &OrderContext, driver: &Driver, load: u32, cfg: &EngineConfig) -> bool {
    if driver.status != DriverStatus::Active {
        return false;
    }

    if !driver.works_on(ctx.order.weekday()) {
        return false;
    }

    if load >= driver.max_orders_per_day {
        return false;
    }

    if cfg.region_avoidance_is_hard && touches_avoided_region(ctx, driver) {
        return false;
    }

    if cfg.long_distance_is_hard
        && ctx.is_long_distance(cfg.long_distance_threshold_km)
        && !driver.can_do_long_distance
    {
        return false;
    }

    true
}

/// The hard-eligible subset of the roster for one order. An empty result
/// is a normal outcome: the order stays pending this pass.
pub fn eligible_drivers<'a>(
    ctx: &OrderContext,
    roster: &'a [Driver],
    load: &LoadMap,
    cfg: &EngineConfig,
) -> Vec<&'a Driver> {
    roster
        .iter()
        .filter(|driver| {
            let current = load.get(&driver.id).copied().unwrap_or(0);
            is_eligible(ctx, driver, current, cfg)
        })
        .collect()
}

pub fn touches_avoided_region(ctx: &OrderContext, driver: &Driver) -> bool {
    let regions = ctx.regions();
    driver
        .preferences
        .avoid_regions
        .iter()
        .any(|avoided| regions.iter().any(|r| r.eq_ignore_ascii_case(avoided)))
}
