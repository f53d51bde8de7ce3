use std::time::Duration;

use thiserror::Error;

use casper_deploy_types::{DeployBuildError, DeployHash, DeployValidationFailure};

use crate::{
    key_store::{KeyStoreError, SigningError},
    node_client::ErrFormatter,
    rpc_transport::TransportError,
};

/// Terminal failure of a deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{0}")]
    InvalidKeyFormat(String),
    #[error("{0}")]
    InvalidParameters(String),
    #[error("{0}")]
    SigningError(String),
    #[error("{message} (after {attempts} attempt(s))")]
    NetworkError { message: String, attempts: usize },
    #[error("node rejected the deploy: {message}")]
    RpcRejected { code: Option<i64>, message: String },
    #[error(
        "deploy {deploy_hash} was not finalized within {}",
        humantime::format_duration(*.waited)
    )]
    TimedOut {
        deploy_hash: DeployHash,
        waited: Duration,
    },
    #[error("deploy {deploy_hash} expired before it was executed")]
    Expired { deploy_hash: DeployHash },
    #[error("deploy {deploy_hash} failed: {message}")]
    ExecutionFailed {
        deploy_hash: DeployHash,
        message: String,
    },
    #[error("cancelled while waiting for deploy")]
    Cancelled { deploy_hash: Option<DeployHash> },
}

impl DeployError {
    /// Stable name of the failure kind, as printed in `error [<kind>]: <message>`.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::InvalidKeyFormat(_) => "InvalidKeyFormat",
            DeployError::InvalidParameters(_) => "InvalidParameters",
            DeployError::SigningError(_) => "SigningError",
            DeployError::NetworkError { .. } => "NetworkError",
            DeployError::RpcRejected { .. } => "RpcRejected",
            DeployError::TimedOut { .. } => "TimedOut",
            DeployError::Expired { .. } => "Expired",
            DeployError::ExecutionFailed { .. } => "Error",
            DeployError::Cancelled { .. } => "Cancelled",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            DeployError::InvalidKeyFormat(_) => 2,
            DeployError::InvalidParameters(_) => 3,
            DeployError::SigningError(_) => 4,
            DeployError::NetworkError { .. } => 5,
            DeployError::RpcRejected { .. } => 6,
            DeployError::TimedOut { .. } => 7,
            DeployError::Expired { .. } => 8,
            DeployError::ExecutionFailed { .. } => 9,
            DeployError::Cancelled { .. } => 130,
        }
    }

    /// Hash of the deploy the failure concerns, once one was computed.
    pub fn deploy_hash(&self) -> Option<&DeployHash> {
        match self {
            DeployError::TimedOut { deploy_hash, .. }
            | DeployError::Expired { deploy_hash }
            | DeployError::ExecutionFailed { deploy_hash, .. } => Some(deploy_hash),
            DeployError::Cancelled { deploy_hash } => deploy_hash.as_ref(),
            _ => None,
        }
    }
}

impl From<TransportError> for DeployError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Network { attempts, source } => DeployError::NetworkError {
                message: ErrFormatter(&source).to_string(),
                attempts,
            },
            TransportError::Rejected { code, message } => DeployError::RpcRejected {
                code: Some(code),
                message,
            },
            TransportError::UnexpectedResponse(message) => DeployError::RpcRejected {
                code: None,
                message,
            },
            TransportError::Encoding(error) => DeployError::InvalidParameters(error.to_string()),
        }
    }
}

impl From<KeyStoreError> for DeployError {
    fn from(error: KeyStoreError) -> Self {
        DeployError::InvalidKeyFormat(ErrFormatter(&error).to_string())
    }
}

impl From<SigningError> for DeployError {
    fn from(error: SigningError) -> Self {
        DeployError::SigningError(error.to_string())
    }
}

impl From<DeployBuildError> for DeployError {
    fn from(error: DeployBuildError) -> Self {
        DeployError::InvalidParameters(error.to_string())
    }
}

impl From<DeployValidationFailure> for DeployError {
    fn from(error: DeployValidationFailure) -> Self {
        match error {
            DeployValidationFailure::EmptyApprovals
            | DeployValidationFailure::InvalidApproval { .. } => {
                DeployError::SigningError(error.to_string())
            }
            DeployValidationFailure::ExcessiveSize { .. }
            | DeployValidationFailure::Encoding(_) => {
                DeployError::InvalidParameters(error.to_string())
            }
        }
    }
}
