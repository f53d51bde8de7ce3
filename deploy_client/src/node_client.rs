use std::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use async_trait::async_trait;
use metrics::node_rpc::observe_request;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, field};
use url::Url;

use crate::config::NodeConfig;

const JSON_RPC_VERSION: &str = "2.0";

/// A connection to a node's JSON-RPC endpoint.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Sends one JSON-RPC request and returns its `result` member.
    async fn send_request(&self, method: &str, params: Value) -> Result<Value, Error>;
}

#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be handed to the node, e.g. connection refused or DNS failure.
    #[error("failed to connect to {endpoint}: {message}")]
    Connection { endpoint: String, message: String },
    #[error("request to the node timed out")]
    Timeout,
    #[error("node answered with HTTP status {0}")]
    HttpStatus(u16),
    #[error("request error: {0}")]
    RequestFailed(String),
    #[error("failed to deserialize the envelope of a response: {0}")]
    EnvelopeDeserialization(String),
    #[error("node returned JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("response carries neither a result nor an error")]
    EmptyResponse,
}

impl Error {
    /// Whether the failure proves the node never received the request, so resending it cannot
    /// duplicate a submission.
    pub fn safe_to_resend(&self) -> bool {
        match self {
            Error::Connection { .. } => true,
            Error::HttpStatus(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || *status == StatusCode::SERVICE_UNAVAILABLE.as_u16()
            }
            _ => false,
        }
    }

    /// Whether a read-only request failing this way is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout | Error::RequestFailed(_) => true,
            Error::HttpStatus(status) => {
                self.safe_to_resend()
                    || StatusCode::from_u16(*status)
                        .map(|status| status.is_server_error())
                        .unwrap_or(false)
            }
            other => other.safe_to_resend(),
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Error::Connection { .. } => "connection_error",
            Error::Timeout => "timeout",
            Error::HttpStatus(_) => "http_error",
            Error::RequestFailed(_) => "request_error",
            Error::EnvelopeDeserialization(_) | Error::EmptyResponse => "malformed_response",
            Error::Rpc { .. } => "rpc_error",
        }
    }

    fn from_reqwest(error: reqwest::Error, endpoint: &Url) -> Self {
        if error.is_connect() {
            Error::Connection {
                endpoint: endpoint.to_string(),
                message: ErrFormatter(&error).to_string(),
            }
        } else if error.is_timeout() {
            Error::Timeout
        } else if error.is_decode() {
            Error::EnvelopeDeserialization(error.to_string())
        } else {
            Error::RequestFailed(ErrFormatter(&error).to_string())
        }
    }
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// [`NodeClient`] over HTTP.
pub struct HttpNodeClient {
    client: Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl HttpNodeClient {
    pub fn new(config: &NodeConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|error| Error::RequestFailed(ErrFormatter(&error).to_string()))?;
        Ok(HttpNodeClient {
            client,
            endpoint: config.rpc_endpoint.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn round_trip(&self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": JSON_RPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "sending request to the node");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|error| Error::from_reqwest(error, &self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }
        let envelope: ResponseEnvelope = response
            .json()
            .await
            .map_err(|error| Error::from_reqwest(error, &self.endpoint))?;
        match (envelope.result, envelope.error) {
            (_, Some(error)) => Err(Error::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::EmptyResponse),
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn send_request(&self, method: &str, params: Value) -> Result<Value, Error> {
        let start = Instant::now();
        let result = self.round_trip(method, params).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(error) => error.outcome(),
        };
        observe_request(method, outcome, start.elapsed());
        result
    }
}

/// Wraps an error to ensure it gets properly captured by tracing.
pub fn display_error<'a, T>(err: &'a T) -> field::DisplayValue<ErrFormatter<'a, T>>
where
    T: std::error::Error + 'a,
{
    field::display(ErrFormatter(err))
}

/// An error formatter.
pub struct ErrFormatter<'a, T>(pub &'a T);

impl<'a, T> Display for ErrFormatter<'a, T>
where
    T: std::error::Error,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut opt_source: Option<&(dyn std::error::Error)> = Some(self.0);

        while let Some(source) = opt_source {
            write!(f, "{}", source)?;
            opt_source = source.source();

            if opt_source.is_some() {
                f.write_str(": ")?;
            }
        }

        Ok(())
    }
}
