#![deny(clippy::complexity)]
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]

mod config;
mod run;

use std::{env, io, path::PathBuf, process::ExitCode};

use anyhow::{anyhow, Error};
use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use casper_deploy_types::{parse_session_arg, DeployHash, Digest, Key, NamedArg, U256};

const LOG_CONFIGURATION_ENVVAR: &str = "RUST_LOG";
const DEFAULT_LOG_FILTER: &str = "warn,casper_deploy_client=info,casper_deployer=info";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CmdLineArgs {
    /// Path to the TOML-formatted config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install an ERC20 token contract and print its address
    InstallToken(InstallTokenArgs),
    /// Install a contract from a compiled session binary and print its address
    Install(InstallArgs),
    /// Call an entry point of an installed contract and print the deploy hash
    Call(CallArgs),
    /// Poll the status of a deploy once
    Status {
        #[arg(long, value_name = "HEX")]
        deploy_hash: DeployHash,
    },
    /// Print a value stored in global state
    Query {
        /// Formatted key, e.g. `hash-..` or `account-hash-..`
        #[arg(long)]
        key: Key,
        /// Named keys to follow from `key`
        #[arg(long)]
        path: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct SigningArgs {
    /// Path to the PEM encoded secret key of the sending account
    #[arg(long, value_name = "FILE")]
    pub secret_key: PathBuf,
    /// Payment in motes
    #[arg(long)]
    pub payment_amount: u64,
    /// How long to wait for the deploy to execute, defaults to `deploy.timeout_secs`
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Args, Debug)]
pub struct InstallTokenArgs {
    #[command(flatten)]
    pub signing: SigningArgs,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub symbol: String,
    #[arg(long)]
    pub decimals: u8,
    #[arg(long, value_parser = parse_u256)]
    pub total_supply: U256,
    /// Path to the compiled token contract
    #[arg(long, value_name = "FILE")]
    pub wasm: PathBuf,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub signing: SigningArgs,
    #[arg(long, value_name = "FILE")]
    pub wasm: PathBuf,
    /// Session arg in the form name:type='value'
    #[arg(long = "session-arg", value_parser = parse_session_arg)]
    pub session_args: Vec<NamedArg>,
    /// Name of a session arg the install cannot go without
    #[arg(long = "required-arg")]
    pub required_args: Vec<String>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("contract").required(true).args(["contract_hash", "contract_name"])))]
pub struct CallArgs {
    #[command(flatten)]
    pub signing: SigningArgs,
    #[arg(long, value_parser = parse_contract_hash)]
    pub contract_hash: Option<Digest>,
    /// Named key of the sending account under which the contract is stored
    #[arg(long)]
    pub contract_name: Option<String>,
    #[arg(long)]
    pub entry_point: String,
    /// Session arg in the form name:type='value'
    #[arg(long = "session-arg", value_parser = parse_session_arg)]
    pub session_args: Vec<NamedArg>,
}

fn parse_u256(input: &str) -> Result<U256, String> {
    U256::from_dec_str(input).map_err(|error| format!("{:?}", error))
}

fn parse_contract_hash(input: &str) -> Result<Digest, String> {
    match input.parse::<Key>() {
        Ok(Key::Hash(hash)) => Ok(Digest::from(hash)),
        Ok(other) => Err(format!("{} is not a contract hash", other)),
        Err(_) => input.parse::<Digest>().map_err(|error| error.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Error> {
    init_logging()?;

    let args = CmdLineArgs::parse();
    let config = match config::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            println!("{}", run::error_line(&error));
            return Ok(ExitCode::from(error.exit_code()));
        }
    };
    debug!("Configuration loaded");

    let exit_code = run::run(config, args.command).await?;
    match metrics::metrics_summary() {
        Ok(summary) => debug!("metrics on exit:\n{}", summary),
        Err(error) => warn!(%error, "failed to collect metrics"),
    }
    Ok(exit_code)
}

fn init_logging() -> Result<(), Error> {
    let filter = EnvFilter::new(
        env::var(LOG_CONFIGURATION_ENVVAR)
            .as_deref()
            .unwrap_or(DEFAULT_LOG_FILTER),
    );
    tracing_subscriber::fmt()
        .with_writer(io::stderr as fn() -> io::Stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow!(error))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_should_be_well_formed() {
        CmdLineArgs::command().debug_assert();
    }

    #[test]
    fn should_parse_install_token_command() {
        let args = CmdLineArgs::try_parse_from([
            "casper-deployer",
            "--config",
            "deployer.toml",
            "install-token",
            "--secret-key",
            "secret_key.pem",
            "--name",
            "FerrumX",
            "--symbol",
            "FRMX",
            "--decimals",
            "11",
            "--total-supply",
            "1000000000000000",
            "--payment-amount",
            "200000000000",
            "--wasm",
            "erc20_token.wasm",
        ])
        .unwrap();

        let Command::InstallToken(install) = args.command else {
            panic!("expected install-token");
        };
        assert_eq!(install.decimals, 11);
        assert_eq!(install.total_supply, U256::from(1_000_000_000_000_000_u64));
        assert_eq!(install.signing.payment_amount, 200_000_000_000);
        assert_eq!(install.signing.timeout_secs, None);
    }

    #[test]
    fn should_reject_out_of_range_decimals() {
        let result = CmdLineArgs::try_parse_from([
            "casper-deployer",
            "--config",
            "deployer.toml",
            "install-token",
            "--secret-key",
            "secret_key.pem",
            "--name",
            "FerrumX",
            "--symbol",
            "FRMX",
            "--decimals",
            "256",
            "--total-supply",
            "1",
            "--payment-amount",
            "1",
            "--wasm",
            "erc20_token.wasm",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn call_should_require_a_contract() {
        let base = [
            "casper-deployer",
            "-c",
            "deployer.toml",
            "call",
            "--secret-key",
            "secret_key.pem",
            "--payment-amount",
            "2500000000",
            "--entry-point",
            "transfer",
        ];
        assert!(CmdLineArgs::try_parse_from(base).is_err());

        let hash = format!("hash-{}", "ab".repeat(32));
        let args = CmdLineArgs::try_parse_from(
            base.iter()
                .copied()
                .chain(["--contract-hash", hash.as_str(), "--session-arg", "amount:u256='10'"]),
        )
        .unwrap();
        let Command::Call(call) = args.command else {
            panic!("expected call");
        };
        assert_eq!(call.contract_hash.unwrap().to_hex(), "ab".repeat(32));
        assert_eq!(call.session_args[0].name(), "amount");
    }

    #[test]
    fn should_parse_contract_hash_with_or_without_prefix() {
        let hex = "01".repeat(32);
        assert_eq!(
            parse_contract_hash(&format!("hash-{}", hex)).unwrap(),
            parse_contract_hash(&hex).unwrap()
        );
        assert!(parse_contract_hash(&format!("account-hash-{}", hex)).is_err());
    }
}
