#![deny(clippy::complexity)]
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]

//! Client side of a Casper contract deployment: loads the signing key, talks to a node over
//! JSON-RPC and drives a deploy from building to finalization.

pub mod config;
mod deploy_manager;
mod error;
mod event_stream;
mod key_store;
mod node_client;
mod rpc_transport;

pub use config::{
    ClientConfig, ClientConfigTarget, DeployConfig, ExponentialBackoffConfig, MaxAttempts,
    NodeConfig,
};
pub use deploy_manager::{
    CallParams, ContractRef, DeployManager, DeployPhase, Deployment, InstallParams, TokenParams,
    ARG_DECIMALS, ARG_NAME, ARG_SYMBOL, ARG_TOTAL_SUPPLY,
};
pub use error::DeployError;
pub use event_stream::{processed_deploy_hash, EventStreamListener};
pub use key_store::{KeyStore, KeyStoreError, SigningError};
pub use node_client::{
    display_error, Error as ClientError, ErrFormatter, HttpNodeClient, NodeClient,
};
pub use rpc_transport::{
    parse_deploy_status, DeployStatus, ExecutionOutcome, RpcTransport, Transport, TransportError,
};
