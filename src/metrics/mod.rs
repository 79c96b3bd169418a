use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;

lazy_static! {
    pub static ref RECONCILE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("reconcile_total", "Total reconciliations per controller by result"),
        &["controller", "result"]
    )
    .expect("metric can not be created");

    pub static ref RECONCILE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("reconcile_errors_total", "Total reconcile errors per controller"),
        &["controller"]
    )
    .expect("metric can not be created");

    pub static ref RECONCILE_TIME_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("reconcile_time_seconds", "Length of time per reconciliation")
            .buckets(exponential_buckets(0.001, 2.0, 16).expect("valid buckets")),
        &["controller"]
    )
    .expect("metric can not be created");

    pub static ref WORKQUEUE_DEPTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("workqueue_depth", "Current depth of the workqueue"),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref WORKQUEUE_ADDS: IntCounterVec = IntCounterVec::new(
        Opts::new("workqueue_adds_total", "Total adds handled by the workqueue"),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref WORKQUEUE_RETRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("workqueue_retries_total", "Total rate limited retries handled by the workqueue"),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(RECONCILE_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RECONCILE_ERRORS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RECONCILE_TIME_SECONDS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WORKQUEUE_DEPTH.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WORKQUEUE_ADDS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WORKQUEUE_RETRIES.clone()))
        .expect("collector can be registered");
}

/// Shared registry with the runtime collectors attached.
pub fn registry() -> &'static Registry {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));
    &REGISTRY
}

/// Renders every runtime metric in the Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry().gather(), &mut buffer) {
        tracing::error!("could not encode runtime metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
