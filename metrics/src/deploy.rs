use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

use super::REGISTRY;

const FINALIZATION_SECONDS_BUCKETS: &[f64; 8] = &[
    5_f64, 10_f64, 20_f64, 30_f64, 60_f64, 120_f64, 300_f64, 600_f64,
];

static POLL_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("deploy_poll_attempts", "Deploy status polls")
        .expect("deploy_poll_attempts metric can't be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("cannot register metric");
    counter
});

static OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("deploy_outcomes", "Terminal phases reached by deployments"),
        &["phase"],
    )
    .unwrap();
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("cannot register metric");
    counter
});

static TIME_TO_FINALIZATION: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "deploy_time_to_finalization",
        "Seconds from submission until the deploy was executed",
    )
    .buckets(FINALIZATION_SECONDS_BUCKETS.to_vec());
    let histogram =
        Histogram::with_opts(opts).expect("deploy_time_to_finalization metric can't be created");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("cannot register metric");
    histogram
});

pub fn inc_poll_attempt() {
    POLL_ATTEMPTS.inc();
}

pub fn inc_outcome(phase: &str) {
    OUTCOMES.with_label_values(&[phase]).inc();
}

pub fn observe_time_to_finalization(elapsed: Duration) {
    TIME_TO_FINALIZATION.observe(elapsed.as_secs_f64());
}
