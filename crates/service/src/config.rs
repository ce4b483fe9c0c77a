//! Service configuration loaded from environment variables.

use std::time::Duration;

use chain::EthClientConfig;
use common::{ChainAddress, RetryPolicy};
use domain::{DomainError, TokenRegistry};
use reconciler::ReconcilerConfig;
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid token configuration: {0}")]
    Token(#[from] DomainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// ERC-20 tokens whose contract address may be configured as
/// `TOKEN_<SYMBOL>_ADDRESS`. Native ETH needs no address.
const CONFIGURABLE_TOKENS: &[&str] = &["USDT", "USDC", "LINK"];

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: Postgres URL; the in-memory store is used when unset
/// - `RPC_HTTP_URL` (required), `RPC_WS_URL`: node endpoints
/// - `PAYMENT_CONTRACT_ADDRESS` (required)
/// - `START_BLOCK` (default `0`), `MAX_BLOCK_RANGE` (default `2000`)
/// - `SWEEP_INTERVAL_SECS` (300), `SWEEP_GRACE_SECS` (60),
///   `PENDING_EXPIRY_SECS` (3600)
/// - `LOOKUP_MAX_ATTEMPTS` (5), `LOOKUP_BASE_DELAY_SECS` (5)
/// - `RECONNECT_MAX_DELAY_SECS` (60)
/// - `TOKEN_USDT_ADDRESS`, `TOKEN_USDC_ADDRESS`, `TOKEN_LINK_ADDRESS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub rpc_http_url: String,
    pub rpc_ws_url: Option<String>,
    pub contract_address: ChainAddress,
    pub start_block: u64,
    pub max_block_range: u64,
    pub sweep_interval: Duration,
    pub sweep_grace: Duration,
    pub pending_expiry: Duration,
    pub lookup_max_attempts: u32,
    pub lookup_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub token_addresses: Vec<(String, ChainAddress)>,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid("LOG_FORMAT", other, "expected text or json")),
        };

        let contract_address = var("PAYMENT_CONTRACT_ADDRESS")
            .ok_or(ConfigError::Missing("PAYMENT_CONTRACT_ADDRESS"))?;
        let contract_address = ChainAddress::parse(&contract_address)
            .map_err(|e| invalid("PAYMENT_CONTRACT_ADDRESS", &contract_address, e))?;

        let mut token_addresses = Vec::new();
        for symbol in CONFIGURABLE_TOKENS {
            let key = format!("TOKEN_{symbol}_ADDRESS");
            if let Some(raw) = var(&key) {
                let address = ChainAddress::parse(&raw).map_err(|e| invalid(&key, &raw, e))?;
                token_addresses.push((symbol.to_string(), address));
            }
        }

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&var, "PORT", 3000)?,
            log_level: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format,
            database_url: var("DATABASE_URL"),
            rpc_http_url: var("RPC_HTTP_URL").ok_or(ConfigError::Missing("RPC_HTTP_URL"))?,
            rpc_ws_url: var("RPC_WS_URL"),
            contract_address,
            start_block: parse_or(&var, "START_BLOCK", 0)?,
            max_block_range: parse_or(&var, "MAX_BLOCK_RANGE", 2_000)?,
            sweep_interval: Duration::from_secs(parse_or(&var, "SWEEP_INTERVAL_SECS", 300)?),
            sweep_grace: Duration::from_secs(parse_or(&var, "SWEEP_GRACE_SECS", 60)?),
            pending_expiry: Duration::from_secs(parse_or(&var, "PENDING_EXPIRY_SECS", 3600)?),
            lookup_max_attempts: parse_or(&var, "LOOKUP_MAX_ATTEMPTS", 5)?,
            lookup_base_delay: Duration::from_secs(parse_or(&var, "LOOKUP_BASE_DELAY_SECS", 5)?),
            reconnect_max_delay: Duration::from_secs(parse_or(
                &var,
                "RECONNECT_MAX_DELAY_SECS",
                60,
            )?),
            token_addresses,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reconciler_config(&self) -> Result<ReconcilerConfig, ConfigError> {
        let defaults = ReconcilerConfig::default();
        Ok(ReconcilerConfig {
            lookup_retry: RetryPolicy::new(
                self.lookup_max_attempts,
                self.lookup_base_delay,
                defaults.lookup_retry.max_delay(),
            ),
            reconnect: RetryPolicy::unbounded(
                defaults.reconnect.base_delay(),
                self.reconnect_max_delay,
            ),
            sweep_interval: self.sweep_interval,
            sweep_grace: to_chrono("SWEEP_GRACE_SECS", self.sweep_grace)?,
            pending_expiry: to_chrono("PENDING_EXPIRY_SECS", self.pending_expiry)?,
            start_block: self.start_block,
            max_block_range: self.max_block_range,
            ..defaults
        })
    }

    /// Native ETH plus every configured ERC-20 token.
    pub fn token_registry(&self) -> Result<TokenRegistry, ConfigError> {
        let mut tokens = TokenRegistry::new();
        for (symbol, address) in &self.token_addresses {
            tokens = tokens.with_known_token(symbol, address.clone())?;
        }
        Ok(tokens)
    }

    pub fn eth_client_config(&self) -> EthClientConfig {
        EthClientConfig {
            http_url: self.rpc_http_url.clone(),
            ws_url: self.rpc_ws_url.clone(),
            contract_address: self.contract_address.clone(),
            retry: RetryPolicy::default(),
        }
    }
}

fn invalid(key: &str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(key, &raw, e)),
        None => Ok(default),
    }
}

fn to_chrono(key: &str, duration: Duration) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| invalid(key, &duration.as_secs().to_string(), e))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("RPC_HTTP_URL", "http://localhost:8545"),
            ("PAYMENT_CONTRACT_ADDRESS", CONTRACT),
        ]
    }

    #[test]
    fn test_default_values() {
        let config = load(&minimal()).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert!(config.rpc_ws_url.is_none());
        assert_eq!(config.contract_address.as_str(), CONTRACT.to_lowercase());
        assert_eq!(config.sweep_interval, Duration::from_secs(300));

        let reconciler = config.reconciler_config().unwrap();
        assert_eq!(reconciler.lookup_retry.max_attempts(), 5);
        assert_eq!(reconciler.lookup_retry.base_delay(), Duration::from_secs(5));
        assert_eq!(reconciler.reconnect.max_delay(), Duration::from_secs(60));
        assert_eq!(reconciler.sweep_grace, chrono::Duration::minutes(1));
        assert_eq!(reconciler.pending_expiry, chrono::Duration::hours(1));
    }

    #[test]
    fn test_required_values() {
        assert!(matches!(
            load(&[("PAYMENT_CONTRACT_ADDRESS", CONTRACT)]),
            Err(ConfigError::Missing("RPC_HTTP_URL"))
        ));
        assert!(matches!(
            load(&[("RPC_HTTP_URL", "http://localhost:8545")]),
            Err(ConfigError::Missing("PAYMENT_CONTRACT_ADDRESS"))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut vars = minimal();
        vars.extend([
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("START_BLOCK", "19000000"),
            ("MAX_BLOCK_RANGE", "500"),
            ("PENDING_EXPIRY_SECS", "7200"),
            ("TOKEN_USDT_ADDRESS", "0xdAC17F958D2ee523a2206206994597C13D831ec7"),
        ]);
        let config = load(&vars).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.start_block, 19_000_000);
        assert_eq!(config.reconciler_config().unwrap().max_block_range, 500);
        assert_eq!(
            config.reconciler_config().unwrap().pending_expiry,
            chrono::Duration::hours(2)
        );

        let tokens = config.token_registry().unwrap();
        assert_eq!(tokens.by_symbol("usdt").unwrap().decimals, 6);
        assert!(tokens.by_symbol("ETH").is_some());
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = minimal();
        vars.push(("PORT", "eighty"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { .. })));

        let mut vars = minimal();
        vars.push(("TOKEN_USDC_ADDRESS", "0x1234"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { .. })));

        let mut vars = minimal();
        vars.push(("LOG_FORMAT", "yaml"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { .. })));
    }
}
