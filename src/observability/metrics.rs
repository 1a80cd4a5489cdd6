use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub runs_total: IntCounterVec,
    pub run_duration_seconds: HistogramVec,
    pub orders_assigned_total: IntCounter,
    pub orders_unassigned_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub driver_utilization: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let runs_total = IntCounterVec::new(
            Opts::new("dispatch_runs_total", "Engine runs by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_runs_total metric");

        let run_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_run_duration_seconds",
                "Duration of one engine run in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_run_duration_seconds metric");

        let orders_assigned_total = IntCounter::new(
            "orders_assigned_total",
            "Orders committed to a driver across all runs",
        )
        .expect("valid orders_assigned_total metric");

        let orders_unassigned_total = IntCounterVec::new(
            Opts::new("orders_unassigned_total", "Orders left pending by reason"),
            &["reason"],
        )
        .expect("valid orders_unassigned_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Driver notifications by outcome"),
            &["outcome"],
        )
        .expect("valid notifications_total metric");

        let driver_utilization = GaugeVec::new(
            Opts::new(
                "driver_utilization",
                "Assigned orders over daily cap per driver [0..1]",
            ),
            &["driver_id"],
        )
        .expect("valid driver_utilization metric");

        registry
            .register(Box::new(runs_total.clone()))
            .expect("register dispatch_runs_total");
        registry
            .register(Box::new(run_duration_seconds.clone()))
            .expect("register dispatch_run_duration_seconds");
        registry
            .register(Box::new(orders_assigned_total.clone()))
            .expect("register orders_assigned_total");
        registry
            .register(Box::new(orders_unassigned_total.clone()))
            .expect("register orders_unassigned_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(driver_utilization.clone()))
            .expect("register driver_utilization");

        Self {
            registry,
            runs_total,
            run_duration_seconds,
            orders_assigned_total,
            orders_unassigned_total,
            notifications_total,
            driver_utilization,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
