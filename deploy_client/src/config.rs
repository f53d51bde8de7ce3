use std::{
    convert::{TryFrom, TryInto},
    time::Duration,
};

use datasize::DataSize;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Default timeout of a single JSON-RPC request.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Default interval between two status polls.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
/// Default time an install waits for its deploy to execute.
const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 300;
const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_GAS_PRICE: u64 = 1;

const DEFAULT_INITIAL_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;
const DEFAULT_COEFFICIENT: u64 = 2;
const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
// Disallow unknown fields to ensure config files and command-line overrides contain valid keys.
#[serde(deny_unknown_fields)]
pub struct ClientConfigTarget {
    pub node: NodeConfigTarget,
    #[serde(default)]
    pub deploy: DeployConfig,
}

/// Validated client configuration.
#[derive(Clone, DataSize, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub node: NodeConfig,
    pub deploy: DeployConfig,
}

impl TryFrom<ClientConfigTarget> for ClientConfig {
    type Error = FieldParseError;
    fn try_from(value: ClientConfigTarget) -> Result<Self, Self::Error> {
        let node = value.node.try_into().map_err(|e: FieldParseError| {
            FieldParseError::ParseError {
                field_name: "node",
                error: e.to_string(),
            }
        })?;
        Ok(ClientConfig {
            node,
            deploy: value.deploy,
        })
    }
}

#[derive(Error, Debug)]
pub enum FieldParseError {
    #[error("failed to parse field {} with error: {}", .field_name, .error)]
    ParseError {
        field_name: &'static str,
        error: String,
    },
}

/// Connection to a single node.
#[derive(Clone, DataSize, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    /// JSON-RPC endpoint, e.g. `http://127.0.0.1:7777/rpc`.
    #[data_size(skip)]
    pub rpc_endpoint: Url,
    /// SSE endpoint used to learn about executed deploys early.
    #[data_size(skip)]
    pub event_stream_endpoint: Option<Url>,
    /// Name of the network deploys are built for.
    pub chain_name: String,
    /// Timeout of a single request to the node.
    pub request_timeout_secs: u64,
    /// Retry schedule of transient request failures.
    pub exponential_backoff: ExponentialBackoffConfig,
}

impl NodeConfig {
    pub fn new(rpc_endpoint: Url, chain_name: impl Into<String>) -> Self {
        NodeConfig {
            rpc_endpoint,
            event_stream_endpoint: None,
            chain_name: chain_name.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            exponential_backoff: ExponentialBackoffConfig::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
// Disallow unknown fields to ensure config files and command-line overrides contain valid keys.
#[serde(deny_unknown_fields)]
pub struct NodeConfigTarget {
    pub rpc_endpoint: Url,
    pub event_stream_endpoint: Option<Url>,
    pub chain_name: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub exponential_backoff: ExponentialBackoffConfigTarget,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl TryFrom<NodeConfigTarget> for NodeConfig {
    type Error = FieldParseError;
    fn try_from(value: NodeConfigTarget) -> Result<Self, Self::Error> {
        let exponential_backoff =
            value
                .exponential_backoff
                .try_into()
                .map_err(|e: FieldParseError| FieldParseError::ParseError {
                    field_name: "exponential_backoff",
                    error: e.to_string(),
                })?;
        Ok(NodeConfig {
            rpc_endpoint: value.rpc_endpoint,
            event_stream_endpoint: value.event_stream_endpoint,
            chain_name: value.chain_name,
            request_timeout_secs: value.request_timeout_secs,
            exponential_backoff,
        })
    }
}

/// How deploys are built and awaited.
#[derive(Clone, DataSize, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct DeployConfig {
    /// Interval between two status polls.
    pub poll_interval_secs: u64,
    /// How long an install waits for its deploy to execute.
    pub timeout_secs: u64,
    /// Time-to-live of the deploys, e.g. `"30m"`.
    #[data_size(skip)]
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub gas_price: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_secs: DEFAULT_DEPLOY_TIMEOUT_SECS,
            ttl: DEFAULT_TTL,
            gas_price: DEFAULT_GAS_PRICE,
        }
    }
}

impl DeployConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Exponential backoff configuration for retried requests.
#[derive(Clone, DataSize, Debug, Deserialize, PartialEq, Eq)]
// Disallow unknown fields to ensure config files and command-line overrides contain valid keys.
#[serde(deny_unknown_fields)]
pub struct ExponentialBackoffConfig {
    /// Initial wait time before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum wait time between retries.
    pub max_delay_ms: u64,
    /// The multiplier to apply to the previous delay to get the next delay.
    pub coefficient: u64,
    /// Maximum number of attempts, the first one included.
    pub max_attempts: MaxAttempts,
}

impl Default for ExponentialBackoffConfig {
    fn default() -> Self {
        ExponentialBackoffConfig {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            coefficient: DEFAULT_COEFFICIENT,
            max_attempts: MaxAttempts::Finite(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

/// Exponential backoff configuration for retried requests.
#[derive(Clone, DataSize, Debug, Deserialize, PartialEq, Eq)]
// Disallow unknown fields to ensure config files and command-line overrides contain valid keys.
#[serde(deny_unknown_fields)]
pub struct ExponentialBackoffConfigTarget {
    /// Initial wait time before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum wait time between retries.
    pub max_delay_ms: u64,
    /// The multiplier to apply to the previous delay to get the next delay.
    pub coefficient: u64,
    /// Maximum number of attempts, the first one included.
    pub max_attempts: MaxAttemptsTarget,
}

impl Default for ExponentialBackoffConfigTarget {
    fn default() -> Self {
        ExponentialBackoffConfigTarget {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            coefficient: DEFAULT_COEFFICIENT,
            max_attempts: MaxAttemptsTarget::UsizeBased(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl TryFrom<ExponentialBackoffConfigTarget> for ExponentialBackoffConfig {
    type Error = FieldParseError;
    fn try_from(value: ExponentialBackoffConfigTarget) -> Result<Self, Self::Error> {
        let max_attempts = value
            .max_attempts
            .try_into()
            .map_err(|e: MaxAttemptsError| FieldParseError::ParseError {
                field_name: "max_attempts",
                error: e.to_string(),
            })?;
        Ok(ExponentialBackoffConfig {
            initial_delay_ms: value.initial_delay_ms,
            max_delay_ms: value.max_delay_ms,
            coefficient: value.coefficient,
            max_attempts,
        })
    }
}

#[derive(Clone, DataSize, Debug, Deserialize, PartialEq, Eq)]
pub enum MaxAttempts {
    Infinite,
    Finite(usize),
}

impl MaxAttempts {
    pub fn can_attempt(&self, current_attempt: usize) -> bool {
        match self {
            MaxAttempts::Infinite => true,
            MaxAttempts::Finite(max_attempts) => *max_attempts >= current_attempt,
        }
    }
}

#[derive(Clone, DataSize, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MaxAttemptsTarget {
    StringBased(String),
    UsizeBased(usize),
}

impl TryFrom<MaxAttemptsTarget> for MaxAttempts {
    type Error = MaxAttemptsError;
    fn try_from(value: MaxAttemptsTarget) -> Result<Self, Self::Error> {
        match value {
            MaxAttemptsTarget::StringBased(s) if s == "infinite" => Ok(MaxAttempts::Infinite),
            MaxAttemptsTarget::StringBased(s) => Err(MaxAttemptsError::UnexpectedValue(s)),
            MaxAttemptsTarget::UsizeBased(0) => {
                Err(MaxAttemptsError::UnexpectedValue(0.to_string()))
            }
            MaxAttemptsTarget::UsizeBased(u) => Ok(MaxAttempts::Finite(u)),
        }
    }
}

#[derive(Error, Debug)]
pub enum MaxAttemptsError {
    #[error("Max attempts must be either 'infinite' or a integer > 0. Got: {}", .0)]
    UnexpectedValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
        [node]
        rpc_endpoint = "http://127.0.0.1:7777/rpc"
        event_stream_endpoint = "http://127.0.0.1:9999/events/main"
        chain_name = "casper-net-1"
        request_timeout_secs = 10

        [node.exponential_backoff]
        initial_delay_ms = 100
        max_delay_ms = 1000
        coefficient = 3
        max_attempts = "infinite"

        [deploy]
        poll_interval_secs = 5
        timeout_secs = 120
        ttl = "1h"
        gas_price = 2
    "#;

    fn parse(input: &str) -> Result<ClientConfig, String> {
        let target: ClientConfigTarget = toml::from_str(input).map_err(|e| e.to_string())?;
        ClientConfig::try_from(target).map_err(|e| e.to_string())
    }

    #[test]
    fn should_parse_full_config() {
        let config = parse(FULL_CONFIG).unwrap();
        assert_eq!(config.node.rpc_endpoint.as_str(), "http://127.0.0.1:7777/rpc");
        assert_eq!(
            config.node.event_stream_endpoint.as_ref().map(Url::as_str),
            Some("http://127.0.0.1:9999/events/main")
        );
        assert_eq!(config.node.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.node.exponential_backoff.max_attempts, MaxAttempts::Infinite);
        assert_eq!(config.node.exponential_backoff.coefficient, 3);
        assert_eq!(config.deploy.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.deploy.ttl, Duration::from_secs(3600));
        assert_eq!(config.deploy.gas_price, 2);
    }

    #[test]
    fn should_apply_defaults_to_minimal_config() {
        let config = parse(
            r#"
            [node]
            rpc_endpoint = "http://localhost:7777/rpc"
            chain_name = "casper-test"
            "#,
        )
        .unwrap();
        assert_eq!(config.node.event_stream_endpoint, None);
        assert_eq!(config.node.exponential_backoff, ExponentialBackoffConfig::default());
        assert_eq!(
            config.node.exponential_backoff.max_attempts,
            MaxAttempts::Finite(5)
        );
        assert_eq!(config.deploy, DeployConfig::default());
        assert_eq!(config.deploy.ttl, Duration::from_secs(1800));
    }

    #[test]
    fn should_reject_unknown_fields() {
        let input = FULL_CONFIG.replace("gas_price = 2", "gas_price = 2\nspeed = 1");
        assert!(parse(&input).is_err());
        let input = FULL_CONFIG.replace("chain_name", "network_name");
        assert!(parse(&input).is_err());
    }

    #[test]
    fn should_report_invalid_max_attempts_with_field_path() {
        let input = FULL_CONFIG.replace(r#"max_attempts = "infinite""#, "max_attempts = 0");
        let error = parse(&input).unwrap_err();
        assert!(error.contains("node"), "{}", error);
        assert!(error.contains("max_attempts"), "{}", error);
    }

    #[test]
    fn test_should_deserialize_infinite() {
        let json = r#""infinite""#.to_string();
        let deserialized: MaxAttempts = serde_json::from_str::<MaxAttemptsTarget>(&json)
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(deserialized, MaxAttempts::Infinite);
    }

    #[test]
    fn test_should_fail_on_other_inputs() {
        assert_failing_deserialization(r#""x""#);
        assert_failing_deserialization(r#""infinite ""#);
        assert_failing_deserialization("0");
        let deserialized = serde_json::from_str::<MaxAttemptsTarget>(r#"-1"#);
        assert!(deserialized.is_err());
    }

    #[test]
    fn should_bound_attempts() {
        let finite = MaxAttempts::Finite(5);
        assert!(finite.can_attempt(5));
        assert!(!finite.can_attempt(6));
        assert!(MaxAttempts::Infinite.can_attempt(usize::MAX));
    }

    fn assert_failing_deserialization(input: &str) {
        let deserialized: Result<MaxAttempts, MaxAttemptsError> =
            serde_json::from_str::<MaxAttemptsTarget>(input)
                .unwrap()
                .try_into();
        assert!(deserialized.is_err(), "input = {}", input);
    }
}
