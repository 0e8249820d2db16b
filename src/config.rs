//! Relay configuration
//!
//! Loaded with the `config` crate from, in increasing priority:
//! `relay.toml`, `config/relay.toml`, the file passed on the command line, and
//! `RELAY_*` environment variables (nested keys use `__`).
//!
//! Accounts come from `accounts` (inline records) or from `accounts_file`. A
//! single-line `accounts` value may separate records with `;` so one environment
//! variable can hold several; credentials containing `;` must then go in a
//! multi-line value or in `accounts_file`, where `;` is kept as is.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tvm_relay_core::{DispatcherConfig, ExchangeEndpoints, SizingMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the webhook listener binds to
    pub bind_address: SocketAddr,

    /// Inline account records `id, exchange, key, secret[, passphrase]`; a
    /// single-line value is split into records on `;`
    pub accounts: String,

    /// File holding account records, one per line; wins over `accounts`
    pub accounts_file: Option<PathBuf>,

    /// Maximum number of order pipelines running at once
    pub max_in_flight: usize,

    /// Per-call timeout for exchange requests
    pub request_timeout_secs: u64,

    /// Multiply the committed balance by leverage when sizing orders
    pub apply_leverage_to_size: bool,

    /// Override for the Bitget REST host
    pub bitget_url: Option<String>,

    /// Override for the Bybit REST host
    pub bybit_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            accounts: String::new(),
            accounts_file: None,
            max_in_flight: 64,
            request_timeout_secs: exchange_connectors::DEFAULT_REQUEST_TIMEOUT_SECS,
            apply_leverage_to_size: false,
            bitget_url: None,
            bybit_url: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from files and the environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("relay.toml").required(false))
            .add_source(File::with_name("config/relay.toml").required(false));
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let relay_config = Self::from_builder(builder)?;

        info!("Relay configuration loaded:");
        info!("  Bind Address: {}", relay_config.bind_address);
        info!("  Max In Flight: {}", relay_config.max_in_flight);
        info!("  Request Timeout: {}s", relay_config.request_timeout_secs);
        info!("  Leverage In Sizing: {}", relay_config.apply_leverage_to_size);
        if let Some(file) = &relay_config.accounts_file {
            info!("  Accounts File: {}", file.display());
        }

        Ok(relay_config)
    }

    pub(crate) fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let relay_config: RelayConfig = builder.build()?.try_deserialize()?;
        relay_config.validate()?;
        Ok(relay_config)
    }

    /// Validates the configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Message(
                "max_in_flight must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        for (key, value) in [("bitget_url", &self.bitget_url), ("bybit_url", &self.bybit_url)] {
            if let Some(raw) = value {
                let parsed = url::Url::parse(raw)
                    .map_err(|e| ConfigError::Message(format!("{key} is not a valid URL: {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::Message(format!(
                        "{key} must use http or https, got {}",
                        parsed.scheme()
                    )));
                }
            }
        }

        if self.accounts.trim().is_empty() && self.accounts_file.is_none() {
            warn!("No accounts configured - every signal will be rejected");
        }

        Ok(())
    }

    /// Account records, one per line
    pub fn account_records(&self) -> Result<String, ConfigError> {
        match &self.accounts_file {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                ConfigError::Message(format!(
                    "failed to read accounts file {}: {e}",
                    path.display()
                ))
            }),
            None if self.accounts.contains('\n') => Ok(self.accounts.clone()),
            None => Ok(self.accounts.replace(';', "\n")),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn endpoints(&self) -> ExchangeEndpoints {
        ExchangeEndpoints {
            bitget: self.bitget_url.clone(),
            bybit: self.bybit_url.clone(),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_in_flight: self.max_in_flight,
            sizing: SizingMode::from_flag(self.apply_leverage_to_size),
        }
    }
}
