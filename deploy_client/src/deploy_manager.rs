//! Builds, signs, submits and awaits deploys.
//!
//! A deployment moves through `Signed -> Submitted -> {Finalized, Failed, TimedOut}`. Building
//! happens inside [`DeployManager::prepare`], which only returns once the deploy is signed.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use casper_deploy_types::{
    bytesrepr, Approval, DeployBuilder, DeployHash, DeployRequest, Digest, ExecutableDeployItem,
    RuntimeArgs, SignedDeploy, U256,
};
use metrics::deploy::{inc_outcome, inc_poll_attempt, observe_time_to_finalization};

use crate::{
    config::{ClientConfig, DeployConfig},
    error::DeployError,
    key_store::KeyStore,
    node_client::display_error,
    rpc_transport::{DeployStatus, ExecutionOutcome, Transport},
};

const WASM_MAGIC: &[u8; 4] = b"\0asm";

pub const ARG_NAME: &str = "name";
pub const ARG_SYMBOL: &str = "symbol";
pub const ARG_DECIMALS: &str = "decimals";
pub const ARG_TOTAL_SUPPLY: &str = "total_supply";

/// Installation of a contract from its compiled session binary.
#[derive(Clone, Debug, Default)]
pub struct InstallParams {
    pub wasm: Vec<u8>,
    pub args: RuntimeArgs,
    /// Payment in motes.
    pub payment_amount: u64,
    /// Names that must be present in `args`.
    pub required_args: Vec<String>,
}

/// Installation of an ERC20 token contract.
#[derive(Clone, Debug)]
pub struct TokenParams {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
    pub payment_amount: u64,
    pub wasm: Vec<u8>,
}

impl TryFrom<TokenParams> for InstallParams {
    type Error = DeployError;

    fn try_from(params: TokenParams) -> Result<Self, Self::Error> {
        let encoding_error =
            |error: bytesrepr::Error| DeployError::InvalidParameters(error.to_string());
        let mut args = RuntimeArgs::new();
        args.insert(ARG_NAME, params.name).map_err(encoding_error)?;
        args.insert(ARG_SYMBOL, params.symbol).map_err(encoding_error)?;
        args.insert(ARG_DECIMALS, params.decimals).map_err(encoding_error)?;
        args.insert(ARG_TOTAL_SUPPLY, params.total_supply)
            .map_err(encoding_error)?;
        Ok(InstallParams {
            wasm: params.wasm,
            args,
            payment_amount: params.payment_amount,
            required_args: [ARG_NAME, ARG_SYMBOL, ARG_DECIMALS, ARG_TOTAL_SUPPLY]
                .iter()
                .map(|name| name.to_string())
                .collect(),
        })
    }
}

/// A stored contract, addressed by its hash or by a named key of the calling account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractRef {
    Hash(Digest),
    Name(String),
}

/// Invocation of an entry point of an installed contract.
#[derive(Clone, Debug)]
pub struct CallParams {
    pub contract: ContractRef,
    pub entry_point: String,
    pub args: RuntimeArgs,
    pub payment_amount: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DeployPhase {
    Signed,
    Submitted,
    Finalized,
    Failed,
    TimedOut,
}

impl DeployPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployPhase::Signed => "signed",
            DeployPhase::Submitted => "submitted",
            DeployPhase::Finalized => "finalized",
            DeployPhase::Failed => "failed",
            DeployPhase::TimedOut => "timed_out",
        }
    }
}

impl Display for DeployPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed deploy and how far it got.
#[derive(Debug)]
pub struct Deployment {
    deploy: SignedDeploy,
    phase: DeployPhase,
    poll_attempts: u32,
    expects_contract: bool,
    outcome: Option<ExecutionOutcome>,
}

impl Deployment {
    pub fn phase(&self) -> DeployPhase {
        self.phase
    }

    pub fn poll_attempts(&self) -> u32 {
        self.poll_attempts
    }

    pub fn deploy(&self) -> &SignedDeploy {
        &self.deploy
    }

    pub fn deploy_hash(&self) -> &DeployHash {
        self.deploy.hash()
    }

    /// Execution result reported by the node, once the deploy ran.
    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.outcome.as_ref()
    }

    pub fn contract_address(&self) -> Option<&str> {
        self.outcome.as_ref()?.contract_address.as_deref()
    }

    fn finish(&mut self, phase: DeployPhase) {
        self.phase = phase;
        inc_outcome(phase.as_str());
    }
}

pub struct DeployManager {
    chain_name: String,
    config: DeployConfig,
    key_store: Arc<KeyStore>,
    transport: Arc<dyn Transport>,
    events: Option<broadcast::Sender<DeployHash>>,
}

impl DeployManager {
    pub fn new(
        chain_name: impl Into<String>,
        config: DeployConfig,
        key_store: Arc<KeyStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        DeployManager {
            chain_name: chain_name.into(),
            config,
            key_store,
            transport,
            events: None,
        }
    }

    pub fn from_config(
        config: &ClientConfig,
        key_store: Arc<KeyStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        DeployManager::new(
            config.node.chain_name.clone(),
            config.deploy.clone(),
            key_store,
            transport,
        )
    }

    /// Wakes the polling loop early whenever `events` reports the tracked deploy.
    pub fn with_event_notifications(mut self, events: broadcast::Sender<DeployHash>) -> Self {
        self.events = Some(events);
        self
    }

    /// Installs a contract and returns the formatted key it was stored under.
    pub async fn install(
        &self,
        params: InstallParams,
        timeout: Duration,
    ) -> Result<String, DeployError> {
        self.install_cancellable(params, timeout, &CancellationToken::new())
            .await
    }

    pub async fn install_cancellable(
        &self,
        params: InstallParams,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        let mut deployment = self.prepare(params)?;
        let outcome = self.execute(&mut deployment, timeout, cancel).await?;
        // `settle` fails install deploys that stored no contract.
        Ok(outcome.contract_address.unwrap_or_default())
    }

    pub async fn install_token(
        &self,
        params: TokenParams,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        self.install_cancellable(params.try_into()?, timeout, cancel)
            .await
    }

    /// Calls a stored contract and returns the hash of the executed deploy.
    pub async fn call(
        &self,
        params: CallParams,
        timeout: Duration,
    ) -> Result<DeployHash, DeployError> {
        self.call_cancellable(params, timeout, &CancellationToken::new())
            .await
    }

    pub async fn call_cancellable(
        &self,
        params: CallParams,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeployHash, DeployError> {
        let mut deployment = self.prepare_call(params)?;
        self.execute(&mut deployment, timeout, cancel).await?;
        Ok(*deployment.deploy_hash())
    }

    /// Validates `params`, then builds and signs the install deploy.
    pub fn prepare(&self, params: InstallParams) -> Result<Deployment, DeployError> {
        if params.wasm.is_empty() {
            return Err(DeployError::InvalidParameters(
                "session binary is empty".to_string(),
            ));
        }
        if !params.wasm.starts_with(WASM_MAGIC) {
            return Err(DeployError::InvalidParameters(
                "session binary is not a WASM module".to_string(),
            ));
        }
        if let Some(missing) = params
            .required_args
            .iter()
            .find(|name| !params.args.contains(name))
        {
            return Err(DeployError::InvalidParameters(format!(
                "missing required arg '{}'",
                missing
            )));
        }
        let session = ExecutableDeployItem::new_module_bytes(params.wasm, params.args);
        self.build_and_sign(session, params.payment_amount, true)
    }

    /// Validates `params`, then builds and signs the call deploy.
    pub fn prepare_call(&self, params: CallParams) -> Result<Deployment, DeployError> {
        if params.entry_point.is_empty() {
            return Err(DeployError::InvalidParameters(
                "entry point must not be empty".to_string(),
            ));
        }
        let session = match params.contract {
            ContractRef::Hash(hash) => ExecutableDeployItem::new_stored_contract_by_hash(
                hash,
                params.entry_point,
                params.args,
            ),
            ContractRef::Name(name) => ExecutableDeployItem::new_stored_contract_by_name(
                name,
                params.entry_point,
                params.args,
            ),
        };
        self.build_and_sign(session, params.payment_amount, false)
    }

    /// Signs `request` with the key store's key, which must be the request's sender.
    pub fn sign_request(&self, request: DeployRequest) -> Result<SignedDeploy, DeployError> {
        let signer = self.key_store.public_key();
        if request.sender() != signer {
            return Err(DeployError::SigningError(format!(
                "deploy sender {} does not match the signing key {}",
                request.sender(),
                signer
            )));
        }
        let signature = self.key_store.sign(request.deploy_hash().as_ref())?;
        Ok(SignedDeploy::new(
            request,
            vec![Approval::new(signer.clone(), signature)],
        )?)
    }

    /// Submits a signed deployment and waits for it to execute, for at most `timeout`.
    pub async fn execute(
        &self,
        deployment: &mut Deployment,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, DeployError> {
        if deployment.phase != DeployPhase::Signed {
            return Err(DeployError::InvalidParameters(format!(
                "deployment is already {}",
                deployment.phase
            )));
        }

        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            submitted = self.transport.submit(&deployment.deploy) => Some(submitted),
        };
        let deploy_hash = match submitted {
            Some(Ok(deploy_hash)) => deploy_hash,
            Some(Err(error)) => {
                warn!(
                    deploy_hash = %deployment.deploy_hash(),
                    err = display_error(&error),
                    "deploy was not accepted"
                );
                deployment.finish(DeployPhase::Failed);
                return Err(error.into());
            }
            None => {
                // The request may already have reached the node.
                info!(deploy_hash = %deployment.deploy_hash(), "cancelled during submission");
                deployment.finish(DeployPhase::Failed);
                return Err(DeployError::Cancelled {
                    deploy_hash: Some(*deployment.deploy_hash()),
                });
            }
        };
        deployment.phase = DeployPhase::Submitted;
        info!(%deploy_hash, "deploy submitted");

        let submitted_at = Instant::now();
        let mut events = self.events.as_ref().map(broadcast::Sender::subscribe);
        let polled = tokio::select! {
            _ = cancel.cancelled() => None,
            polled = tokio::time::timeout(
                timeout,
                self.poll_until_terminal(&deploy_hash, &mut deployment.poll_attempts, &mut events),
            ) => Some(polled),
        };

        match polled {
            None => {
                info!(%deploy_hash, "stopped waiting for deploy");
                Err(DeployError::Cancelled {
                    deploy_hash: Some(deploy_hash),
                })
            }
            Some(Err(_)) => {
                warn!(
                    %deploy_hash,
                    attempts = deployment.poll_attempts,
                    "gave up waiting for deploy"
                );
                deployment.finish(DeployPhase::TimedOut);
                Err(DeployError::TimedOut {
                    deploy_hash,
                    waited: timeout,
                })
            }
            Some(Ok(status)) => settle(deployment, deploy_hash, status, submitted_at.elapsed()),
        }
    }

    fn build_and_sign(
        &self,
        session: ExecutableDeployItem,
        payment_amount: u64,
        expects_contract: bool,
    ) -> Result<Deployment, DeployError> {
        let request = DeployBuilder::new(
            self.chain_name.clone(),
            self.key_store.public_key().clone(),
            session,
        )
        .with_payment_amount(payment_amount)
        .with_ttl(self.config.ttl)
        .with_gas_price(self.config.gas_price)
        .build()?;
        let deploy = self.sign_request(request)?;
        debug!(deploy_hash = %deploy.hash(), "deploy signed");
        Ok(Deployment {
            deploy,
            phase: DeployPhase::Signed,
            poll_attempts: 0,
            expects_contract,
            outcome: None,
        })
    }

    async fn poll_until_terminal(
        &self,
        deploy_hash: &DeployHash,
        attempts: &mut u32,
        events: &mut Option<broadcast::Receiver<DeployHash>>,
    ) -> DeployStatus {
        loop {
            self.wait_for_next_poll(deploy_hash, events).await;
            *attempts += 1;
            inc_poll_attempt();
            match self.transport.poll_status(deploy_hash).await {
                Ok(status) if status.is_terminal() => return status,
                Ok(_) => debug!(%deploy_hash, attempt = *attempts, "deploy still pending"),
                // Already accepted, so keep polling until the deadline.
                Err(error) => warn!(
                    %deploy_hash,
                    attempt = *attempts,
                    err = display_error(&error),
                    "failed to poll deploy status"
                ),
            }
        }
    }

    async fn wait_for_next_poll(
        &self,
        deploy_hash: &DeployHash,
        events: &mut Option<broadcast::Receiver<DeployHash>>,
    ) {
        let interval = tokio::time::sleep(self.config.poll_interval());
        tokio::pin!(interval);
        let Some(receiver) = events.as_mut() else {
            interval.await;
            return;
        };
        loop {
            tokio::select! {
                _ = &mut interval => return,
                received = receiver.recv() => match received {
                    Ok(processed) if processed == *deploy_hash => {
                        debug!(%deploy_hash, "event stream reported deploy, polling now");
                        return;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }
        *events = None;
        interval.await;
    }
}

fn settle(
    deployment: &mut Deployment,
    deploy_hash: DeployHash,
    status: DeployStatus,
    elapsed: Duration,
) -> Result<ExecutionOutcome, DeployError> {
    let error = match status {
        DeployStatus::Executed(outcome) => {
            deployment.outcome = Some(outcome.clone());
            if !outcome.success {
                DeployError::ExecutionFailed {
                    deploy_hash,
                    message: outcome
                        .error_message
                        .unwrap_or_else(|| "execution failed".to_string()),
                }
            } else if deployment.expects_contract && outcome.contract_address.is_none() {
                DeployError::ExecutionFailed {
                    deploy_hash,
                    message: "deploy executed but stored no contract".to_string(),
                }
            } else {
                info!(
                    %deploy_hash,
                    contract_address = outcome.contract_address.as_deref().unwrap_or("none"),
                    cost = outcome.cost.as_deref().unwrap_or("unknown"),
                    "deploy finalized"
                );
                observe_time_to_finalization(elapsed);
                deployment.finish(DeployPhase::Finalized);
                return Ok(outcome);
            }
        }
        DeployStatus::Expired => DeployError::Expired { deploy_hash },
        DeployStatus::Error(message) => DeployError::ExecutionFailed {
            deploy_hash,
            message,
        },
        // Not produced by `poll_until_terminal`.
        DeployStatus::Pending => DeployError::ExecutionFailed {
            deploy_hash,
            message: "deploy is still pending".to_string(),
        },
    };
    warn!(%deploy_hash, err = display_error(&error), "deploy failed");
    deployment.finish(DeployPhase::Failed);
    Err(error)
}
