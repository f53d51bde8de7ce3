use std::{path::Path, time::Duration};

use anyhow::{anyhow, bail, Context, Error};

use casper_deploy_client::{ClientConfig, ClientConfigTarget, DeployError};

const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Reads and validates the config file, reporting any failure as invalid parameters.
pub fn load<P: AsRef<Path>>(config_path: P) -> Result<ClientConfig, DeployError> {
    read_config(config_path).map_err(|error| DeployError::InvalidParameters(format!("{:#}", error)))
}

pub fn read_config<P: AsRef<Path>>(config_path: P) -> Result<ClientConfig, Error> {
    let toml_content = std::fs::read_to_string(config_path.as_ref())
        .with_context(|| format!("Error reading config file {}", config_path.as_ref().display()))?;
    parse_config(&toml_content)
}

pub fn parse_config(toml_content: &str) -> Result<ClientConfig, Error> {
    let target: ClientConfigTarget =
        toml::from_str(toml_content).context("Error parsing config into TOML format")?;
    let config = ClientConfig::try_from(target).map_err(|error| anyhow!(error))?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &ClientConfig) -> Result<(), Error> {
    if config.node.chain_name.trim().is_empty() {
        bail!("node.chain_name must not be empty")
    }
    if config.deploy.poll_interval_secs == 0 {
        bail!("deploy.poll_interval_secs must be above 0")
    }
    if config.deploy.ttl > MAX_TTL {
        bail!("deploy.ttl must not exceed one day")
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use casper_deploy_client::MaxAttempts;

    use super::*;

    const EXAMPLE_CONFIG: &str = r#"
[node]
rpc_endpoint = "http://127.0.0.1:7777/rpc"
event_stream_endpoint = "http://127.0.0.1:9999/events/main"
chain_name = "casper-net-1"
request_timeout_secs = 30

[node.exponential_backoff]
initial_delay_ms = 500
max_delay_ms = 8000
coefficient = 2
max_attempts = 5

[deploy]
poll_interval_secs = 2
timeout_secs = 300
ttl = "30m"
gas_price = 1
"#;

    #[test]
    fn should_read_example_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE_CONFIG.as_bytes()).unwrap();

        let config = read_config(file.path()).unwrap();

        assert_eq!(config.node.chain_name, "casper-net-1");
        assert_eq!(
            config.node.event_stream_endpoint.as_ref().map(|url| url.as_str()),
            Some("http://127.0.0.1:9999/events/main")
        );
        assert_eq!(
            config.node.exponential_backoff.max_attempts,
            MaxAttempts::Finite(5)
        );
        assert_eq!(config.deploy.ttl, Duration::from_secs(30 * 60));
    }

    #[test]
    fn should_fail_on_missing_file() {
        let error = read_config("/nonexistent/deployer.toml").unwrap_err();
        assert!(error.to_string().contains("Error reading config file"));
    }

    #[test]
    fn load_should_report_config_errors_as_invalid_parameters() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = EXAMPLE_CONFIG.replace("poll_interval_secs = 2", "poll_interval_secs = 0");
        file.write_all(content.as_bytes()).unwrap();

        let error = load(file.path()).unwrap_err();

        assert_eq!(error.kind(), "InvalidParameters");
        assert_eq!(error.exit_code(), 3);
        assert!(error.to_string().contains("poll_interval_secs must be above 0"));
        assert!(load("/nonexistent/deployer.toml")
            .unwrap_err()
            .to_string()
            .contains("Error reading config file"));
    }

    #[test]
    fn should_fail_validation_with_empty_chain_name() {
        let content = EXAMPLE_CONFIG.replace("\"casper-net-1\"", "\"\"");
        let error = parse_config(&content).unwrap_err();
        assert!(error.to_string().contains("chain_name must not be empty"));
    }

    #[test]
    fn should_fail_validation_with_zero_poll_interval() {
        let content = EXAMPLE_CONFIG.replace("poll_interval_secs = 2", "poll_interval_secs = 0");
        let error = parse_config(&content).unwrap_err();
        assert!(error.to_string().contains("poll_interval_secs must be above 0"));
    }

    #[test]
    fn should_fail_validation_with_excessive_ttl() {
        let content = EXAMPLE_CONFIG.replace("ttl = \"30m\"", "ttl = \"2days\"");
        let error = parse_config(&content).unwrap_err();
        assert!(error.to_string().contains("ttl must not exceed one day"));
    }

    #[test]
    fn should_reject_unknown_keys() {
        let content = EXAMPLE_CONFIG.replace("gas_price = 1", "gas_price = 1\nspeed = 3");
        assert!(parse_config(&content).is_err());
    }
}
