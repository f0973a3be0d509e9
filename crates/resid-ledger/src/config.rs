//! Ledger client configuration.
//!
//! Loaded from `RESID_LEDGER_*` environment variables. The optional RPC
//! bearer token is zeroized on drop and redacted from `Debug` output.

use std::time::Duration;

use resid_core::WalletAddress;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Which ledger backend the services should talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    /// JSON-RPC against a real EVM node.
    Rpc,
    /// In-process [`crate::MockLedger`], for local development.
    Mock,
    /// No ledger configured; credential operations are unavailable.
    Disabled,
}

impl LedgerMode {
    /// Read `RESID_LEDGER_MODE` (`rpc`, `mock`). When unset, `rpc` is chosen
    /// if `RESID_LEDGER_RPC_URL` is present and `Disabled` otherwise.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LedgerMode::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        match lookup("RESID_LEDGER_MODE").as_deref().map(str::trim) {
            Some("rpc") => Ok(Self::Rpc),
            Some("mock") => Ok(Self::Mock),
            Some("disabled") | Some("off") => Ok(Self::Disabled),
            Some(other) => Err(ConfigError::Invalid(
                "RESID_LEDGER_MODE".into(),
                format!("unknown mode {other:?}, expected rpc or mock"),
            )),
            None if lookup("RESID_LEDGER_RPC_URL").is_some() => Ok(Self::Rpc),
            None => Ok(Self::Disabled),
        }
    }
}

/// Bearer token for RPC providers that require authentication.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RpcToken(String);

impl RpcToken {
    /// Wrap a token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret for use in a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RpcToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RpcToken([REDACTED])")
    }
}

/// Configuration for [`crate::EvmLedgerClient`].
///
/// Transaction signing is delegated to the RPC endpoint's key management;
/// `from_address` must be an account that endpoint signs for.
#[derive(Clone)]
pub struct EvmLedgerConfig {
    /// JSON-RPC endpoint URL (HTTPS in production).
    pub rpc_url: Url,
    /// Residency token contract.
    pub contract_address: WalletAddress,
    /// Issuer account whose transactions the endpoint signs.
    pub from_address: WalletAddress,
    /// Human-readable chain name, used in log and error messages.
    pub chain_name: String,
    /// EVM chain ID.
    pub chain_id: u64,
    /// Blocks (including the inclusion block) before a mint counts as confirmed.
    pub confirmations: u64,
    /// Delay between receipt and block-height polls.
    pub poll_interval: Duration,
    /// Upper bound on waiting for a submitted transaction to confirm.
    pub receipt_timeout: Duration,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Optional bearer token for the RPC endpoint.
    pub rpc_token: Option<RpcToken>,
}

impl std::fmt::Debug for EvmLedgerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmLedgerConfig")
            .field("rpc_url", &self.rpc_url.as_str())
            .field("contract_address", &self.contract_address)
            .field("from_address", &self.from_address)
            .field("chain_name", &self.chain_name)
            .field("chain_id", &self.chain_id)
            .field("confirmations", &self.confirmations)
            .field("poll_interval", &self.poll_interval)
            .field("receipt_timeout", &self.receipt_timeout)
            .field("timeout_secs", &self.timeout_secs)
            .field("rpc_token", &self.rpc_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl EvmLedgerConfig {
    /// Create a configuration with defaults: 1 confirmation, 2s polling,
    /// 300s receipt timeout, 30s request timeout, chain `ethereum` (id 1).
    pub fn new(rpc_url: Url, contract_address: WalletAddress, from_address: WalletAddress) -> Self {
        Self {
            rpc_url,
            contract_address,
            from_address,
            chain_name: "ethereum".to_string(),
            chain_id: 1,
            confirmations: 1,
            poll_interval: Duration::from_millis(2000),
            receipt_timeout: Duration::from_secs(300),
            timeout_secs: 30,
            rpc_token: None,
        }
    }

    /// Set the chain identity.
    pub fn with_chain(mut self, name: impl Into<String>, chain_id: u64) -> Self {
        self.chain_name = name.into();
        self.chain_id = chain_id;
        self
    }

    /// Set confirmation depth and polling cadence.
    pub fn with_finality(mut self, confirmations: u64, poll_interval: Duration) -> Self {
        self.confirmations = confirmations.max(1);
        self.poll_interval = poll_interval;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `RESID_LEDGER_RPC_URL` (required)
    /// - `RESID_LEDGER_CONTRACT` (required)
    /// - `RESID_LEDGER_FROM` (required)
    /// - `RESID_LEDGER_CHAIN_NAME` (default: `ethereum`)
    /// - `RESID_LEDGER_CHAIN_ID` (default: 1)
    /// - `RESID_LEDGER_CONFIRMATIONS` (default: 1)
    /// - `RESID_LEDGER_POLL_MS` (default: 2000)
    /// - `RESID_LEDGER_RECEIPT_TIMEOUT_SECS` (default: 300)
    /// - `RESID_LEDGER_TIMEOUT_SECS` (default: 30)
    /// - `RESID_LEDGER_RPC_TOKEN` (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EvmLedgerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::Missing(key.to_string()));

        let rpc_raw = required("RESID_LEDGER_RPC_URL")?;
        let rpc_url = Url::parse(&rpc_raw)
            .map_err(|e| ConfigError::Invalid("RESID_LEDGER_RPC_URL".into(), e.to_string()))?;
        let contract_address = env_address(&lookup, "RESID_LEDGER_CONTRACT")?;
        let from_address = env_address(&lookup, "RESID_LEDGER_FROM")?;

        let chain_id = env_number(&lookup, "RESID_LEDGER_CHAIN_ID", 1)?;
        let confirmations = env_number(&lookup, "RESID_LEDGER_CONFIRMATIONS", 1)?;
        let poll_ms = env_number(&lookup, "RESID_LEDGER_POLL_MS", 2000)?;
        let receipt_timeout = env_number(&lookup, "RESID_LEDGER_RECEIPT_TIMEOUT_SECS", 300)?;
        let timeout_secs = env_number(&lookup, "RESID_LEDGER_TIMEOUT_SECS", 30)?;

        let mut config = Self::new(rpc_url, contract_address, from_address)
            .with_chain(
                lookup("RESID_LEDGER_CHAIN_NAME").unwrap_or_else(|| "ethereum".to_string()),
                chain_id,
            )
            .with_finality(confirmations, Duration::from_millis(poll_ms));
        config.receipt_timeout = Duration::from_secs(receipt_timeout);
        config.timeout_secs = timeout_secs;
        config.rpc_token = lookup("RESID_LEDGER_RPC_TOKEN")
            .filter(|t| !t.is_empty())
            .map(RpcToken::new);
        Ok(config)
    }
}

fn env_address(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<WalletAddress, ConfigError> {
    let raw = lookup(key).ok_or_else(|| ConfigError::Missing(key.to_string()))?;
    WalletAddress::new(raw).map_err(|e| ConfigError::Invalid(key.to_string(), e.to_string()))
}

fn env_number(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid(key.to_string(), e.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base() -> HashMap<String, String> {
        vars(&[
            ("RESID_LEDGER_RPC_URL", "https://rpc.example.org"),
            (
                "RESID_LEDGER_CONTRACT",
                "0x1111111111111111111111111111111111111111",
            ),
            ("RESID_LEDGER_FROM", "0x2222222222222222222222222222222222222222"),
        ])
    }

    #[test]
    fn from_lookup_applies_defaults() {
        let env = base();
        let cfg = EvmLedgerConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.chain_id, 1);
        assert_eq!(cfg.confirmations, 1);
        assert_eq!(cfg.poll_interval, Duration::from_millis(2000));
        assert_eq!(cfg.timeout_secs, 30);
        assert!(cfg.rpc_token.is_none());
    }

    #[test]
    fn from_lookup_reads_overrides() {
        let mut env = base();
        env.insert("RESID_LEDGER_CHAIN_ID".into(), "8453".into());
        env.insert("RESID_LEDGER_CHAIN_NAME".into(), "base".into());
        env.insert("RESID_LEDGER_CONFIRMATIONS".into(), "3".into());
        env.insert("RESID_LEDGER_RPC_TOKEN".into(), "s3cret".into());
        let cfg = EvmLedgerConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.chain_id, 8453);
        assert_eq!(cfg.chain_name, "base");
        assert_eq!(cfg.confirmations, 3);
        assert_eq!(cfg.rpc_token.as_ref().map(RpcToken::expose), Some("s3cret"));
    }

    #[test]
    fn missing_contract_is_reported() {
        let mut env = base();
        env.remove("RESID_LEDGER_CONTRACT");
        let err = EvmLedgerConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("RESID_LEDGER_CONTRACT"));
    }

    #[test]
    fn bad_number_is_reported() {
        let mut env = base();
        env.insert("RESID_LEDGER_CHAIN_ID".into(), "mainnet".into());
        let err = EvmLedgerConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref k, _) if k == "RESID_LEDGER_CHAIN_ID"));
    }

    #[test]
    fn debug_redacts_token() {
        let mut env = base();
        env.insert("RESID_LEDGER_RPC_TOKEN".into(), "s3cret".into());
        let cfg = EvmLedgerConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn mode_selection() {
        let none: HashMap<String, String> = HashMap::new();
        assert_eq!(
            LedgerMode::from_lookup(|k| none.get(k).cloned()).unwrap(),
            LedgerMode::Disabled
        );
        let env = base();
        assert_eq!(
            LedgerMode::from_lookup(|k| env.get(k).cloned()).unwrap(),
            LedgerMode::Rpc
        );
        let mock = vars(&[("RESID_LEDGER_MODE", "mock")]);
        assert_eq!(
            LedgerMode::from_lookup(|k| mock.get(k).cloned()).unwrap(),
            LedgerMode::Mock
        );
        let bad = vars(&[("RESID_LEDGER_MODE", "ganache")]);
        assert!(LedgerMode::from_lookup(|k| bad.get(k).cloned()).is_err());
    }
}
