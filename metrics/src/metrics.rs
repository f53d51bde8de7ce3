use std::fmt::{Display, Formatter};

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static ERROR_COUNTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("deployer_error_counts", "Error counts by kind"),
        &["category", "description"],
    )
    .unwrap();
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("cannot register metric");
    counter
});

pub fn observe_error(category: &str, description: &str) {
    ERROR_COUNTS
        .with_label_values(&[category, description])
        .inc();
}

#[derive(Debug)]
pub struct MetricCollectionError {
    reason: String,
}

impl Display for MetricCollectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetricCollectionError: {}", self.reason)
    }
}

impl std::error::Error for MetricCollectionError {}

impl MetricCollectionError {
    fn new(reason: String) -> Self {
        MetricCollectionError { reason }
    }
}

fn encode(
    families: &[prometheus::proto::MetricFamily],
    what: &str,
) -> Result<String, MetricCollectionError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(families, &mut buffer)
        .map_err(|e| MetricCollectionError::new(format!("could not encode {what} metrics: {e}")))?;
    String::from_utf8(buffer).map_err(|e| {
        MetricCollectionError::new(format!("{what} metrics have a non-utf8 character: {e}"))
    })
}

/// Text exposition of the deployer's metrics followed by the process-wide default registry.
pub fn metrics_summary() -> Result<String, MetricCollectionError> {
    let mut summary = encode(&REGISTRY.gather(), "custom")?;
    summary.push_str(&encode(&prometheus::gather(), "default")?);
    Ok(summary)
}
