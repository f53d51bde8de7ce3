pub mod metrics;
pub use metrics::{metrics_summary, observe_error, MetricCollectionError};
pub mod deploy;
pub mod node_rpc;

use metrics::REGISTRY;
