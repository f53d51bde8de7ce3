//! Submits signed deploys to a node and tracks their execution status.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use casper_deploy_types::{DeployHash, Key, SignedDeploy, Timestamp};
use metrics::node_rpc::inc_retry;

use crate::{
    config::{ExponentialBackoffConfig, NodeConfig},
    node_client::{self, display_error, HttpNodeClient, NodeClient},
};

pub const PUT_DEPLOY_METHOD: &str = "account_put_deploy";
pub const GET_DEPLOY_METHOD: &str = "info_get_deploy";
pub const QUERY_GLOBAL_STATE_METHOD: &str = "query_global_state";

/// Returned by `info_get_deploy` until the node has seen the deploy.
pub const NO_SUCH_DEPLOY_CODE: i64 = -32000;

/// Result of executing a deploy, as reported by the node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Formatted key of the first contract the deploy wrote, e.g. `hash-..`.
    pub contract_address: Option<String>,
    pub error_message: Option<String>,
    pub block_hash: Option<String>,
    pub cost: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DeployStatus {
    Pending,
    Executed(ExecutionOutcome),
    Expired,
    Error(String),
}

impl DeployStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeployStatus::Pending)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error after {attempts} attempt(s): {source}")]
    Network {
        attempts: usize,
        #[source]
        source: node_client::Error,
    },
    #[error("node rejected the request ({code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("unexpected response from the node: {0}")]
    UnexpectedResponse(String),
    #[error("failed to encode request: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Sends deploys and reports their status.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submits `deploy`, returning the hash the node accepted it under.
    async fn submit(&self, deploy: &SignedDeploy) -> Result<DeployHash, TransportError>;

    /// Current status of a deploy. Once a terminal status has been returned for a hash, every
    /// later call returns that same status.
    async fn poll_status(&self, deploy_hash: &DeployHash) -> Result<DeployStatus, TransportError>;
}

struct TrackedDeploy {
    expires_at: Option<Timestamp>,
    terminal: Option<DeployStatus>,
}

/// [`Transport`] over a node's JSON-RPC API.
pub struct RpcTransport {
    client: Arc<dyn NodeClient>,
    backoff: ExponentialBackoffConfig,
    tracked: RwLock<HashMap<DeployHash, TrackedDeploy>>,
}

impl RpcTransport {
    pub fn new(client: Arc<dyn NodeClient>, backoff: ExponentialBackoffConfig) -> Self {
        RpcTransport {
            client,
            backoff,
            tracked: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Result<Self, node_client::Error> {
        let client = HttpNodeClient::new(config)?;
        Ok(RpcTransport::new(
            Arc::new(client),
            config.exponential_backoff.clone(),
        ))
    }

    /// Reads a stored value from global state under `key`, following `path` through named keys.
    pub async fn query(&self, key: &Key, path: &[String]) -> Result<Value, TransportError> {
        let params = json!({
            "state_identifier": null,
            "key": key.to_formatted_string(),
            "path": path,
        });
        let result = self
            .request_with_retries(
                QUERY_GLOBAL_STATE_METHOD,
                params,
                node_client::Error::is_transient,
            )
            .await?;
        result
            .get("stored_value")
            .cloned()
            .ok_or_else(|| TransportError::UnexpectedResponse("missing stored_value".to_string()))
    }

    async fn request_with_retries(
        &self,
        method: &str,
        params: Value,
        should_retry: fn(&node_client::Error) -> bool,
    ) -> Result<Value, TransportError> {
        let mut wait = self.backoff.initial_delay_ms;
        let mut current_attempt = 1;
        loop {
            match self.client.send_request(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(err) if should_retry(&err) => {
                    current_attempt += 1;
                    if !self.backoff.max_attempts.can_attempt(current_attempt) {
                        warn!(method, err = display_error(&err), "retries exhausted");
                        return Err(TransportError::Network {
                            attempts: current_attempt - 1,
                            source: err,
                        });
                    }
                    warn!(
                        method,
                        err = display_error(&err),
                        "request to the node failed, waiting {wait}ms before retrying"
                    );
                    inc_retry(method);
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    wait = wait
                        .saturating_mul(self.backoff.coefficient)
                        .min(self.backoff.max_delay_ms);
                }
                Err(err) => return Err(into_transport_error(err, current_attempt)),
            }
        }
    }

    /// Applies expiry and memoization to a freshly fetched status.
    async fn settle(&self, deploy_hash: &DeployHash, status: DeployStatus) -> DeployStatus {
        let mut tracked = self.tracked.write().await;
        let entry = tracked.entry(*deploy_hash).or_insert(TrackedDeploy {
            expires_at: None,
            terminal: None,
        });
        if let Some(terminal) = &entry.terminal {
            return terminal.clone();
        }
        let status = match status {
            DeployStatus::Pending
                if entry
                    .expires_at
                    .map_or(false, |expires_at| Timestamp::now() > expires_at) =>
            {
                DeployStatus::Expired
            }
            other => other,
        };
        if status.is_terminal() {
            entry.terminal = Some(status.clone());
        }
        status
    }
}

fn into_transport_error(err: node_client::Error, attempts: usize) -> TransportError {
    match err {
        node_client::Error::Rpc { code, message, data } => {
            let message = match data {
                Some(Value::String(detail)) => format!("{message}: {detail}"),
                Some(detail) if !detail.is_null() => format!("{message}: {detail}"),
                _ => message,
            };
            TransportError::Rejected { code, message }
        }
        node_client::Error::HttpStatus(status) if (400..500).contains(&status) => {
            TransportError::Rejected {
                code: i64::from(status),
                message: format!("HTTP status {status}"),
            }
        }
        err @ (node_client::Error::EnvelopeDeserialization(_)
        | node_client::Error::EmptyResponse) => {
            TransportError::UnexpectedResponse(err.to_string())
        }
        source => TransportError::Network { attempts, source },
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn submit(&self, deploy: &SignedDeploy) -> Result<DeployHash, TransportError> {
        let params = json!({ "deploy": serde_json::to_value(deploy)? });
        // Only resend when the node provably did not receive the deploy.
        let result = self
            .request_with_retries(
                PUT_DEPLOY_METHOD,
                params,
                node_client::Error::safe_to_resend,
            )
            .await?;
        let returned = result
            .get("deploy_hash")
            .cloned()
            .ok_or_else(|| TransportError::UnexpectedResponse("missing deploy_hash".to_string()))
            .and_then(|value| {
                serde_json::from_value::<DeployHash>(value).map_err(|err| {
                    TransportError::UnexpectedResponse(format!("invalid deploy_hash: {err}"))
                })
            })?;
        if returned != *deploy.hash() {
            return Err(TransportError::UnexpectedResponse(format!(
                "node accepted deploy {returned}, expected {}",
                deploy.hash()
            )));
        }

        self.tracked.write().await.insert(
            returned,
            TrackedDeploy {
                expires_at: Some(deploy.header().expires_at()),
                terminal: None,
            },
        );
        info!(deploy_hash = %returned, "deploy accepted by the node");
        Ok(returned)
    }

    async fn poll_status(&self, deploy_hash: &DeployHash) -> Result<DeployStatus, TransportError> {
        if let Some(terminal) = self
            .tracked
            .read()
            .await
            .get(deploy_hash)
            .and_then(|tracked| tracked.terminal.clone())
        {
            return Ok(terminal);
        }

        let params = json!({ "deploy_hash": deploy_hash, "finalized_approvals": false });
        let status = match self
            .request_with_retries(GET_DEPLOY_METHOD, params, node_client::Error::is_transient)
            .await
        {
            Ok(result) => parse_deploy_status(&result),
            Err(TransportError::Rejected {
                code: NO_SUCH_DEPLOY_CODE,
                ..
            }) => {
                debug!(%deploy_hash, "node does not know the deploy yet");
                DeployStatus::Pending
            }
            Err(err) => return Err(err),
        };
        Ok(self.settle(deploy_hash, status).await)
    }
}

/// Reads the execution status out of an `info_get_deploy` result, accepting both the
/// `execution_results` (1.x) and the `execution_info` (2.x) layouts.
pub fn parse_deploy_status(result: &Value) -> DeployStatus {
    if let Some(execution_info) = result.get("execution_info").filter(|info| !info.is_null()) {
        let block_hash = string_field(execution_info, "block_hash");
        return match execution_info.get("execution_result") {
            None | Some(Value::Null) => DeployStatus::Pending,
            Some(execution_result) => {
                if let Some(v2) = execution_result.get("Version2") {
                    parse_version2_result(v2, block_hash)
                } else if let Some(v1) = execution_result.get("Version1") {
                    parse_version1_result(v1, block_hash)
                } else {
                    DeployStatus::Error(format!("unknown execution result: {execution_result}"))
                }
            }
        };
    }

    match result
        .get("execution_results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
    {
        None => DeployStatus::Pending,
        Some(execution) => match execution.get("result") {
            Some(inner) => parse_version1_result(inner, string_field(execution, "block_hash")),
            None => DeployStatus::Error(format!("execution result without outcome: {execution}")),
        },
    }
}

fn parse_version1_result(result: &Value, block_hash: Option<String>) -> DeployStatus {
    if let Some(success) = result.get("Success") {
        let contract_address = success
            .pointer("/effect/transforms")
            .and_then(Value::as_array)
            .and_then(|transforms| {
                transforms.iter().find_map(|entry| {
                    let is_contract_write = entry.get("transform").and_then(Value::as_str)
                        == Some("WriteContract");
                    is_contract_write
                        .then(|| string_field(entry, "key"))
                        .flatten()
                })
            });
        DeployStatus::Executed(ExecutionOutcome {
            success: true,
            contract_address,
            error_message: None,
            block_hash,
            cost: string_field(success, "cost"),
        })
    } else if let Some(failure) = result.get("Failure") {
        DeployStatus::Executed(ExecutionOutcome {
            success: false,
            contract_address: None,
            error_message: string_field(failure, "error_message"),
            block_hash,
            cost: string_field(failure, "cost"),
        })
    } else {
        DeployStatus::Error(format!("unknown execution result: {result}"))
    }
}

fn parse_version2_result(result: &Value, block_hash: Option<String>) -> DeployStatus {
    let error_message = string_field(result, "error_message");
    let contract_address = result
        .get("effects")
        .and_then(Value::as_array)
        .and_then(|effects| {
            effects.iter().find_map(|effect| {
                let writes_contract = effect
                    .pointer("/kind/Write")
                    .map_or(false, |written| {
                        written.get("Contract").is_some()
                            || written.get("AddressableEntity").is_some()
                    })
                    || effect.get("kind").and_then(Value::as_str) == Some("WriteContract");
                writes_contract.then(|| string_field(effect, "key")).flatten()
            })
        });
    DeployStatus::Executed(ExecutionOutcome {
        success: error_message.is_none(),
        contract_address,
        error_message,
        block_hash,
        cost: string_field(result, "cost"),
    })
}

fn string_field(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use rand::{rngs::StdRng, SeedableRng};
    use tokio::sync::Mutex;

    use casper_deploy_types::testing::{create_expired_deploy, create_test_deploy};

    use super::*;
    use crate::config::MaxAttempts;

    type Response = Result<Value, node_client::Error>;

    struct MockNodeClient {
        responses: Mutex<VecDeque<Response>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl MockNodeClient {
        fn new(responses: Vec<Response>) -> Arc<Self> {
            Arc::new(MockNodeClient {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(vec![]),
            })
        }

        async fn call_count(&self) -> usize {
            self.calls.lock().await.len()
        }
    }

    #[async_trait]
    impl NodeClient for MockNodeClient {
        async fn send_request(&self, method: &str, params: Value) -> Response {
            self.calls.lock().await.push((method.to_string(), params));
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(node_client::Error::RequestFailed("no response".into())))
        }
    }

    fn transport(client: Arc<MockNodeClient>) -> RpcTransport {
        RpcTransport::new(client, ExponentialBackoffConfig::default())
    }

    fn deploy() -> SignedDeploy {
        let mut rng = StdRng::seed_from_u64(7);
        create_test_deploy(Timestamp::now(), Duration::from_secs(1800), &mut rng)
    }

    fn accepted(deploy: &SignedDeploy) -> Response {
        Ok(json!({"api_version": "1.5.6", "deploy_hash": deploy.hash()}))
    }

    fn refused() -> Response {
        Err(node_client::Error::Connection {
            endpoint: "http://127.0.0.1:7777/rpc".to_string(),
            message: "connection refused".to_string(),
        })
    }

    fn executed_v1(contract: &str) -> Response {
        Ok(json!({
            "deploy": {},
            "execution_results": [{
                "block_hash": "aa".repeat(32),
                "result": {"Success": {
                    "effect": {"operations": [], "transforms": [
                        {"key": "hash-0101", "transform": "WriteContractWasm"},
                        {"key": contract, "transform": "WriteContract"},
                    ]},
                    "transfers": [],
                    "cost": "123456"
                }}
            }]
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn should_retry_submission_while_node_is_unreachable() {
        let deploy = deploy();
        let client = MockNodeClient::new(vec![
            refused(),
            refused(),
            refused(),
            refused(),
            accepted(&deploy),
        ]);
        let transport = transport(client.clone());

        let hash = transport.submit(&deploy).await.unwrap();

        assert_eq!(hash, *deploy.hash());
        assert_eq!(client.call_count().await, 5);
        let calls = client.calls.lock().await;
        assert_eq!(calls[0].0, PUT_DEPLOY_METHOD);
        assert_eq!(calls[0].1["deploy"]["hash"], json!(deploy.hash()));
    }

    #[tokio::test(start_paused = true)]
    async fn should_give_up_after_max_attempts() {
        let deploy = deploy();
        let client = MockNodeClient::new(vec![
            refused(),
            refused(),
            refused(),
            refused(),
            refused(),
            accepted(&deploy),
        ]);
        let transport = transport(client.clone());

        let error = transport.submit(&deploy).await.unwrap_err();

        assert!(matches!(error, TransportError::Network { attempts: 5, .. }), "{:?}", error);
        assert_eq!(client.call_count().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn should_back_off_exponentially_up_to_cap() {
        let deploy = deploy();
        let client = MockNodeClient::new((0..6).map(|_| refused()).collect());
        let backoff = ExponentialBackoffConfig {
            max_attempts: MaxAttempts::Finite(6),
            ..ExponentialBackoffConfig::default()
        };
        let transport = RpcTransport::new(client, backoff);

        let start = tokio::time::Instant::now();
        let _ = transport.submit(&deploy).await.unwrap_err();
        // 500 + 1000 + 2000 + 4000 + 8000
        assert_eq!(start.elapsed(), Duration::from_millis(15_500));
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_resend_submission_after_timeout() {
        let deploy = deploy();
        let client = MockNodeClient::new(vec![Err(node_client::Error::Timeout), accepted(&deploy)]);
        let transport = transport(client.clone());

        let error = transport.submit(&deploy).await.unwrap_err();

        assert!(matches!(error, TransportError::Network { attempts: 1, .. }));
        assert_eq!(client.call_count().await, 1);
    }

    #[tokio::test]
    async fn should_not_retry_rejected_submission() {
        let deploy = deploy();
        let client = MockNodeClient::new(vec![Err(node_client::Error::Rpc {
            code: -32008,
            message: "invalid deploy".to_string(),
            data: Some(json!("insufficient payment")),
        })]);
        let transport = transport(client.clone());

        let error = transport.submit(&deploy).await.unwrap_err();

        match error {
            TransportError::Rejected { code, message } => {
                assert_eq!(code, -32008);
                assert_eq!(message, "invalid deploy: insufficient payment");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(client.call_count().await, 1);
    }

    #[tokio::test]
    async fn should_reject_mismatching_deploy_hash() {
        let deploy = deploy();
        let other = create_test_deploy(
            Timestamp::now(),
            Duration::from_secs(60),
            &mut StdRng::seed_from_u64(8),
        );
        let client = MockNodeClient::new(vec![accepted(&other)]);

        let error = transport(client).submit(&deploy).await.unwrap_err();

        assert!(matches!(error, TransportError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn should_treat_unknown_deploy_as_pending() {
        let deploy = deploy();
        let client = MockNodeClient::new(vec![
            accepted(&deploy),
            Err(node_client::Error::Rpc {
                code: NO_SUCH_DEPLOY_CODE,
                message: "no such deploy".to_string(),
                data: None,
            }),
        ]);
        let transport = transport(client.clone());
        transport.submit(&deploy).await.unwrap();

        let status = transport.poll_status(deploy.hash()).await.unwrap();

        assert_eq!(status, DeployStatus::Pending);
        let calls = client.calls.lock().await;
        assert_eq!(calls[1].0, GET_DEPLOY_METHOD);
        assert_eq!(
            calls[1].1,
            json!({"deploy_hash": deploy.hash(), "finalized_approvals": false})
        );
    }

    #[tokio::test]
    async fn should_report_pending_deploy_past_ttl_as_expired() {
        let deploy = create_expired_deploy(Timestamp::now(), &mut StdRng::seed_from_u64(9));
        let client = MockNodeClient::new(vec![
            accepted(&deploy),
            Ok(json!({"deploy": {}, "execution_results": []})),
        ]);
        let transport = transport(client.clone());
        transport.submit(&deploy).await.unwrap();

        assert_eq!(
            transport.poll_status(deploy.hash()).await.unwrap(),
            DeployStatus::Expired
        );
        assert_eq!(
            transport.poll_status(deploy.hash()).await.unwrap(),
            DeployStatus::Expired
        );
        assert_eq!(client.call_count().await, 2);
    }

    #[tokio::test]
    async fn should_memoize_terminal_status() {
        let deploy = deploy();
        let contract = format!("hash-{}", "cd".repeat(32));
        let client = MockNodeClient::new(vec![
            accepted(&deploy),
            Ok(json!({"deploy": {}, "execution_results": []})),
            executed_v1(&contract),
            Ok(json!({"deploy": {}, "execution_results": []})),
        ]);
        let transport = transport(client.clone());
        transport.submit(&deploy).await.unwrap();

        assert_eq!(
            transport.poll_status(deploy.hash()).await.unwrap(),
            DeployStatus::Pending
        );
        let executed = transport.poll_status(deploy.hash()).await.unwrap();
        assert!(matches!(&executed, DeployStatus::Executed(outcome) if outcome.success));
        for _ in 0..3 {
            assert_eq!(transport.poll_status(deploy.hash()).await.unwrap(), executed);
        }
        assert_eq!(client.call_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn should_retry_polls_on_transient_errors() {
        let deploy = deploy();
        let client = MockNodeClient::new(vec![
            Err(node_client::Error::Timeout),
            Err(node_client::Error::HttpStatus(502)),
            Ok(json!({"deploy": {}, "execution_results": []})),
        ]);

        let status = transport(client.clone())
            .poll_status(deploy.hash())
            .await
            .unwrap();

        assert_eq!(status, DeployStatus::Pending);
        assert_eq!(client.call_count().await, 3);
    }

    #[tokio::test]
    async fn should_query_global_state() {
        let key: Key = format!("hash-{}", "ef".repeat(32)).parse().unwrap();
        let client = MockNodeClient::new(vec![Ok(json!({
            "api_version": "1.5.6",
            "block_header": null,
            "stored_value": {"CLValue": {"cl_type": "U8", "bytes": "0b", "parsed": 11}},
            "merkle_proof": "00"
        }))]);

        let value = transport(client.clone())
            .query(&key, &["decimals".to_string()])
            .await
            .unwrap();

        assert_eq!(value["CLValue"]["parsed"], json!(11));
        let calls = client.calls.lock().await;
        assert_eq!(calls[0].0, QUERY_GLOBAL_STATE_METHOD);
        assert_eq!(calls[0].1["key"], json!(key.to_formatted_string()));
        assert_eq!(calls[0].1["path"], json!(["decimals"]));
    }

    #[test]
    fn should_extract_contract_from_v1_success() {
        let contract = format!("hash-{}", "cd".repeat(32));
        let status = parse_deploy_status(&executed_v1(&contract).unwrap());
        assert_eq!(
            status,
            DeployStatus::Executed(ExecutionOutcome {
                success: true,
                contract_address: Some(contract),
                error_message: None,
                block_hash: Some("aa".repeat(32)),
                cost: Some("123456".to_string()),
            })
        );
    }

    #[test]
    fn should_parse_v1_failure() {
        let status = parse_deploy_status(&json!({
            "execution_results": [{
                "block_hash": "bb",
                "result": {"Failure": {
                    "effect": {"operations": [], "transforms": []},
                    "transfers": [],
                    "cost": "100",
                    "error_message": "User error: 65535"
                }}
            }]
        }));
        match status {
            DeployStatus::Executed(outcome) => {
                assert!(!outcome.success);
                assert_eq!(outcome.error_message.as_deref(), Some("User error: 65535"));
                assert_eq!(outcome.contract_address, None);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn should_parse_v2_execution_info() {
        let entity = format!("entity-contract-{}", "12".repeat(32));
        let status = parse_deploy_status(&json!({
            "deploy": {},
            "execution_info": {
                "block_hash": "cc",
                "block_height": 10,
                "execution_result": {"Version2": {
                    "initiator": {},
                    "error_message": null,
                    "limit": "200000000000",
                    "consumed": "150000000000",
                    "cost": "200000000000",
                    "transfers": [],
                    "effects": [
                        {"key": "uref-00", "kind": "Identity"},
                        {"key": entity, "kind": {"Write": {"AddressableEntity": {}}}}
                    ]
                }}
            }
        }));
        match status {
            DeployStatus::Executed(outcome) => {
                assert!(outcome.success);
                assert_eq!(outcome.contract_address, Some(entity));
                assert_eq!(outcome.block_hash.as_deref(), Some("cc"));
                assert_eq!(outcome.cost.as_deref(), Some("200000000000"));
            }
            other => panic!("unexpected status {:?}", other),
        }

        let pending = parse_deploy_status(&json!({
            "execution_info": {"block_hash": "cc", "execution_result": null}
        }));
        assert_eq!(pending, DeployStatus::Pending);
        let unknown = parse_deploy_status(&json!({
            "execution_info": {"execution_result": {"Version9": {}}}
        }));
        assert!(matches!(unknown, DeployStatus::Error(_)));
    }
}
