use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Config;
use crate::geo::geocoder::Geocoder;
use crate::models::assignment::RunOutcome;
use crate::models::driver::Driver;
use crate::models::order::DailyOrder;
use crate::notify::AssignmentNotice;
use crate::observability::metrics::Metrics;

/// In-memory stand-in for the abstract read/write store. Nothing outside
/// the store survives between engine invocations; every run reloads roster
/// and order state fresh.
pub struct AppState {
    pub config: Config,
    pub drivers: DashMap<Uuid, Driver>,
    pub orders: DashMap<Uuid, DailyOrder>,
    /// Last engine outcome per date, for the diagnostics surface.
    pub runs: DashMap<NaiveDate, RunOutcome>,
    /// Dates with a run in flight; concurrent same-date runs are rejected.
    pub running_dates: DashMap<NaiveDate, ()>,
    pub geocoder: Geocoder,
    pub notice_tx: broadcast::Sender<AssignmentNotice>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> (Self, broadcast::Receiver<AssignmentNotice>) {
        let (notice_tx, notice_rx) = broadcast::channel(config.event_buffer_size);
        let geocoder = Geocoder::new(
            config.geocoder_url.clone(),
            Duration::from_millis(config.geocode_min_interval_ms),
        );

        (
            Self {
                config,
                drivers: DashMap::new(),
                orders: DashMap::new(),
                runs: DashMap::new(),
                running_dates: DashMap::new(),
                geocoder,
                notice_tx,
                metrics: Metrics::new(),
            },
            notice_rx,
        )
    }
}
