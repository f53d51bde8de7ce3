use std::{path::Path, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Error};
use tokio::{
    signal::unix::{signal, SignalKind},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use casper_deploy_client::{
    CallParams, ClientConfig, ContractRef, DeployError, DeployManager, ErrFormatter,
    EventStreamListener, InstallParams, KeyStore, RpcTransport, TokenParams, Transport,
    TransportError,
};
use casper_deploy_types::RuntimeArgs;

use crate::{Command, SigningArgs};

/// Runs `command` to completion and prints its single result line on stdout.
pub async fn run(config: ClientConfig, command: Command) -> Result<ExitCode, Error> {
    let cancel = CancellationToken::new();
    let signal_handler = cancel_on_signal(cancel.clone())?;
    let result = execute(&config, command, &cancel).await;
    signal_handler.abort();
    Ok(match result {
        Ok(line) => {
            println!("{}", line);
            ExitCode::SUCCESS
        }
        Err(error) => {
            metrics::observe_error("deploy", error.kind());
            println!("{}", error_line(&error));
            ExitCode::from(error.exit_code())
        }
    })
}

pub fn error_line(error: &DeployError) -> String {
    format!("error [{}]: {}", error.kind(), error)
}

fn cancel_on_signal(cancel: CancellationToken) -> Result<JoinHandle<()>, Error> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to initialize SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to initialize SIGINT handler")?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM signal. Cancelling..."),
            _ = sigint.recv() => info!("Received SIGINT signal. Cancelling..."),
        }
        cancel.cancel();
    }))
}

pub async fn execute(
    config: &ClientConfig,
    command: Command,
    cancel: &CancellationToken,
) -> Result<String, DeployError> {
    let transport =
        Arc::new(
            RpcTransport::from_config(&config.node).map_err(|error| DeployError::NetworkError {
                message: ErrFormatter(&error).to_string(),
                attempts: 0,
            })?,
        );
    let listener_cancel = cancel.child_token();
    let result = match command {
        Command::InstallToken(args) => {
            let manager = deploy_manager(config, &args.signing, transport, &listener_cancel)?;
            let params = TokenParams {
                name: args.name,
                symbol: args.symbol,
                decimals: args.decimals,
                total_supply: args.total_supply,
                payment_amount: args.signing.payment_amount,
                wasm: read_wasm(&args.wasm).await?,
            };
            manager
                .install_token(params, timeout(config, &args.signing), cancel)
                .await
        }
        Command::Install(args) => {
            let manager = deploy_manager(config, &args.signing, transport, &listener_cancel)?;
            let params = InstallParams {
                wasm: read_wasm(&args.wasm).await?,
                args: RuntimeArgs::from(args.session_args),
                payment_amount: args.signing.payment_amount,
                required_args: args.required_args,
            };
            manager
                .install_cancellable(params, timeout(config, &args.signing), cancel)
                .await
        }
        Command::Call(args) => {
            let contract = match (args.contract_hash, args.contract_name) {
                (Some(hash), _) => ContractRef::Hash(hash),
                (None, Some(name)) => ContractRef::Name(name),
                (None, None) => {
                    return Err(DeployError::InvalidParameters(
                        "either a contract hash or a contract name is required".to_string(),
                    ))
                }
            };
            let manager = deploy_manager(config, &args.signing, transport, &listener_cancel)?;
            let params = CallParams {
                contract,
                entry_point: args.entry_point,
                args: RuntimeArgs::from(args.session_args),
                payment_amount: args.signing.payment_amount,
            };
            manager
                .call_cancellable(params, timeout(config, &args.signing), cancel)
                .await
                .map(|deploy_hash| deploy_hash.to_string())
        }
        Command::Status { deploy_hash } => {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DeployError::Cancelled {
                        deploy_hash: Some(deploy_hash),
                    })
                }
                status = transport.poll_status(&deploy_hash) => status?,
            };
            serde_json::to_string(&status).map_err(|error| TransportError::from(error).into())
        }
        Command::Query { key, path } => {
            let stored_value = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DeployError::Cancelled { deploy_hash: None }),
                stored_value = transport.query(&key, &path) => stored_value?,
            };
            Ok(stored_value.to_string())
        }
    };
    listener_cancel.cancel();
    result
}

fn deploy_manager(
    config: &ClientConfig,
    signing: &SigningArgs,
    transport: Arc<RpcTransport>,
    listener_cancel: &CancellationToken,
) -> Result<DeployManager, DeployError> {
    let key_store = Arc::new(KeyStore::load_file(&signing.secret_key)?);
    info!(account = %key_store.public_key(), "loaded signing key");
    let manager = DeployManager::from_config(config, key_store, transport);
    let Some(endpoint) = config.node.event_stream_endpoint.clone() else {
        return Ok(manager);
    };
    let listener = EventStreamListener::new(endpoint, config.node.exponential_backoff.clone());
    let manager = manager.with_event_notifications(listener.notifier());
    let cancel = listener_cancel.clone();
    tokio::spawn(async move { listener.run(cancel).await });
    Ok(manager)
}

fn timeout(config: &ClientConfig, signing: &SigningArgs) -> Duration {
    signing
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.deploy.timeout())
}

async fn read_wasm(path: &Path) -> Result<Vec<u8>, DeployError> {
    tokio::fs::read(path).await.map_err(|error| {
        DeployError::InvalidParameters(format!(
            "failed to read session binary {}: {}",
            path.display(),
            error
        ))
    })
}
