use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::OrderContext;
use crate::models::driver::Driver;
use crate::state::AppState;

/// Event published for every committed assignment. Carries everything the
/// SMS/chat collaborator needs; delivery failures never touch the
/// commitment itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentNotice {
    pub order_id: Uuid,
    pub external_id: String,
    pub date: NaiveDate,
    pub pickup_address: String,
    pub pickup_time: NaiveTime,
    pub driver_id: Uuid,
    pub driver_name: String,
    pub driver_phone: String,
    pub preferred_language: String,
}

impl AssignmentNotice {
    pub fn new(ctx: &OrderContext, driver: &Driver) -> Self {
        Self {
            order_id: ctx.order.id,
            external_id: ctx.order.external_id.clone(),
            date: ctx.order.order_date,
            pickup_address: ctx.order.pickup_address.clone(),
            pickup_time: ctx.order.pickup_time,
            driver_id: driver.id,
            driver_name: driver.name.clone(),
            driver_phone: driver.phone.clone(),
            preferred_language: driver.preferred_language.clone(),
        }
    }
}

/// Outbound transport boundary. The real deployment plugs SMS/chat in
/// here; the default just logs the message it would send.
pub trait Notify: Send + Sync + 'static {
    fn deliver(&self, notice: &AssignmentNotice) -> Result<(), String>;
}

pub struct LogNotifier;

impl Notify for LogNotifier {
    fn deliver(&self, notice: &AssignmentNotice) -> Result<(), String> {
        info!(
            order = %notice.external_id,
            driver = %notice.driver_name,
            phone = %notice.driver_phone,
            language = %notice.preferred_language,
            pickup = %notice.pickup_time,
            "driver notification queued"
        );
        Ok(())
    }
}

/// Background task draining assignment events. Lag or transport failure is
/// counted and logged; nothing here can fail a dispatch run.
pub async fn run_notifier(
    state: Arc<AppState>,
    mut rx: broadcast::Receiver<AssignmentNotice>,
    notifier: impl Notify,
) {
    info!("notification dispatcher started");

    loop {
        match rx.recv().await {
            Ok(notice) => match notifier.deliver(&notice) {
                Ok(()) => {
                    state
                        .metrics
                        .notifications_total
                        .with_label_values(&["success"])
                        .inc();
                }
                Err(err) => {
                    state
                        .metrics
                        .notifications_total
                        .with_label_values(&["error"])
                        .inc();
                    warn!(order_id = %notice.order_id, error = %err, "notification delivery failed");
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "notification stream lagged; events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    warn!("notification dispatcher stopped: event channel closed");
}
