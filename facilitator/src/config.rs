//! Configuration for the facilitator server.
//!
//! Configuration is layered: a JSON file named by `--config` (or
//! `./config.json` when present), with per-field fallbacks to environment
//! variables and hardcoded defaults.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use url::Url;

use x402_evm::scan::DEFAULT_SCAN_URL;

/// CLI arguments for the facilitator server.
#[derive(Parser, Debug)]
#[command(name = "facilitator")]
#[command(about = "x402 facilitator HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long = "config", short = 'c')]
    config: Option<PathBuf>,
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables, then
/// to hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::port")]
    port: u16,
    #[serde(default = "config_defaults::host")]
    host: IpAddr,
    /// Bearer key clients must present; `None` disables auth.
    #[serde(default = "config_defaults::api_key")]
    api_key: Option<String>,
    /// Enables counterfactual smart-wallet deployment during settlement.
    #[serde(default = "config_defaults::deploy_erc4337_with_eip6492")]
    deploy_erc4337_with_eip6492: bool,
    /// Paymaster validation endpoint; sponsorship is disabled without it.
    #[serde(default = "config_defaults::sponsor_url")]
    sponsor_url: Option<Url>,
    #[serde(default = "config_defaults::sponsor_policy_uuid")]
    sponsor_policy_uuid: Option<String>,
    /// Scan ingestion endpoint for settled-payment records.
    #[serde(default = "config_defaults::scan_url")]
    scan_url: Option<Url>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::port(),
            host: config_defaults::host(),
            api_key: config_defaults::api_key(),
            deploy_erc4337_with_eip6492: config_defaults::deploy_erc4337_with_eip6492(),
            sponsor_url: config_defaults::sponsor_url(),
            sponsor_policy_uuid: config_defaults::sponsor_policy_uuid(),
            scan_url: config_defaults::scan_url(),
        }
    }
}

mod config_defaults {
    use super::*;
    use std::env;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";

    pub fn port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().expect("valid address")))
    }

    pub fn api_key() -> Option<String> {
        env::var("FACILITATOR_API_KEY").ok().filter(|s| !s.is_empty())
    }

    pub fn deploy_erc4337_with_eip6492() -> bool {
        env::var("DEPLOY_ERC4337_WITH_EIP6492")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn sponsor_url() -> Option<Url> {
        env::var("SPONSOR_URL").ok().and_then(|s| s.parse().ok())
    }

    pub fn sponsor_policy_uuid() -> Option<String> {
        env::var("SPONSOR_POLICY_UUID").ok().filter(|s| !s.is_empty())
    }

    pub fn scan_url() -> Option<Url> {
        let raw = env::var("SCAN_API_URL").unwrap_or_else(|_| DEFAULT_SCAN_URL.to_string());
        raw.parse().ok()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    /// Loads configuration from CLI arguments and the JSON file.
    ///
    /// The config file path is `--config <path>` when given, otherwise
    /// `./config.json` if it exists. Missing fields resolve through
    /// environment variables and defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Self::config_path(cli_args.config);
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let content = fs::read_to_string(&p)?;
                let config: Config = serde_json::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Config::default()),
        }
    }

    fn config_path(cli_config: Option<PathBuf>) -> Option<PathBuf> {
        if let Some(path) = cli_config {
            return Some(path);
        }
        let default_path = PathBuf::from("config.json");
        default_path.exists().then_some(default_path)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn deploy_erc4337_with_eip6492(&self) -> bool {
        self.deploy_erc4337_with_eip6492
    }

    pub fn sponsor(&self) -> Option<(Url, String)> {
        match (&self.sponsor_url, &self.sponsor_policy_uuid) {
            (Some(url), Some(policy)) => Some((url.clone(), policy.clone())),
            _ => None,
        }
    }

    pub fn scan_url(&self) -> Option<&Url> {
        self.scan_url.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn parses_full_config() {
        let json = r#"{
            "port": 3000,
            "host": "127.0.0.1",
            "deploy_erc4337_with_eip6492": true,
            "sponsor_url": "https://paymaster.example/validate",
            "sponsor_policy_uuid": "policy-1"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.port(), 3000);
        assert_eq!(config.host().to_string(), "127.0.0.1");
        assert!(config.deploy_erc4337_with_eip6492());
        let (url, policy) = config.sponsor().unwrap();
        assert_eq!(url.as_str(), "https://paymaster.example/validate");
        assert_eq!(policy, "policy-1");
    }

    #[test]
    fn partial_config_uses_defaults() {
        // SAFETY: single-threaded test context.
        unsafe {
            env::remove_var("PORT");
            env::remove_var("HOST");
        }
        let config: Config = serde_json::from_str(r#"{"port": 3000}"#).unwrap();
        assert_eq!(config.port(), 3000);
        assert_eq!(config.host().to_string(), "0.0.0.0");
        assert!(config.sponsor().is_none());
    }

    #[test]
    fn scan_url_defaults_to_compiled_endpoint() {
        // SAFETY: single-threaded test context.
        unsafe { env::remove_var("SCAN_API_URL") };
        let config = Config::default();
        assert_eq!(config.scan_url().unwrap().as_str(), DEFAULT_SCAN_URL);
    }

    #[test]
    fn sponsor_requires_both_fields() {
        // SAFETY: single-threaded test context.
        unsafe {
            env::set_var("SPONSOR_URL", "https://paymaster.example/validate");
            env::remove_var("SPONSOR_POLICY_UUID");
        }
        let config = Config::default();
        assert!(config.sponsor().is_none());
        // SAFETY: single-threaded test context.
        unsafe { env::remove_var("SPONSOR_URL") };
    }
}
