use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

use super::REGISTRY;

const RESPONSE_TIME_MS_BUCKETS: &[f64; 8] = &[
    10_f64, 50_f64, 100_f64, 250_f64, 500_f64, 1000_f64, 5000_f64, 30000_f64,
];

static REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("node_rpc_requests", "JSON-RPC requests sent to the node"),
        &["method", "outcome"],
    )
    .unwrap();
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("cannot register metric");
    counter
});

static RESPONSE_TIMES_MS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts {
            common_opts: Opts::new(
                "node_rpc_response_times",
                "Time it takes the node to answer a JSON-RPC request in milliseconds",
            ),
            buckets: Vec::from(RESPONSE_TIME_MS_BUCKETS as &'static [f64]),
        },
        &["method"],
    )
    .expect("node_rpc_response_times metric can't be created");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("cannot register metric");
    histogram
});

static RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("node_rpc_retries", "Requests resent after a transient failure"),
        &["method"],
    )
    .unwrap();
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("cannot register metric");
    counter
});

static EVENT_STREAM_MESSAGES: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "node_event_stream_messages",
        "Deploy-related messages received from the node's event stream",
    )
    .expect("node_event_stream_messages metric can't be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("cannot register metric");
    counter
});

pub fn observe_request(method: &str, outcome: &str, response_time: Duration) {
    REQUESTS.with_label_values(&[method, outcome]).inc();
    let response_time = response_time.as_secs_f64() * 1000.0;
    RESPONSE_TIMES_MS
        .with_label_values(&[method])
        .observe(response_time);
}

pub fn inc_retry(method: &str) {
    RETRIES.with_label_values(&[method]).inc();
}

pub fn inc_event_stream_message() {
    EVENT_STREAM_MESSAGES.inc();
}
