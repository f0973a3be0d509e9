//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! The store is always present (Postgres when `DATABASE_URL` is set,
//! in-memory otherwise). The ledger is optional: without one the
//! credential routes answer 503 while status lookups and the profile
//! mirror keep working.

use std::sync::Arc;
use std::time::Duration;

use resid_issuance::{
    EligibilityGate, IssuanceCoordinator, ObserverSet, TracingObserver, DEFAULT_LEDGER_DEADLINE,
    DEFAULT_METADATA_BASE_URI,
};
use resid_ledger::{ConfigError, LedgerClient};
use resid_store::IssuanceStore;
use sqlx::PgPool;

use crate::auth::SecretToken;
use crate::error::AppError;
use crate::middleware::metrics::ApiMetrics;

/// Longest per-request ledger deadline a client may ask for.
pub const MAX_LEDGER_DEADLINE: Duration = Duration::from_secs(600);

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Static bearer token. If `None`, authentication is disabled.
    pub auth_token: Option<SecretToken>,
    /// Ledger deadline applied when a mint or sync request does not carry one.
    pub ledger_deadline: Duration,
    /// Base URI under which token metadata is published.
    pub metadata_base_uri: String,
    /// Whether `/metrics` and the metrics middleware are mounted.
    pub metrics_enabled: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("ledger_deadline", &self.ledger_deadline)
            .field("metadata_base_uri", &self.metadata_base_uri)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            ledger_deadline: DEFAULT_LEDGER_DEADLINE,
            metadata_base_uri: DEFAULT_METADATA_BASE_URI.to_string(),
            metrics_enabled: true,
        }
    }
}

impl AppConfig {
    /// Read configuration from the environment.
    ///
    /// - `PORT` (default: 8080)
    /// - `AUTH_TOKEN` (optional; unset disables authentication)
    /// - `RESID_LEDGER_DEADLINE_SECS` (default: 120)
    /// - `RESID_METADATA_BASE_URI` (default: `ipfs://residency`)
    /// - `RESID_METRICS_ENABLED` (default: true; only `false` disables)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| {
                    ConfigError::Invalid("PORT".into(), e.to_string())
                })?,
            None => defaults.port,
        };

        let ledger_deadline = match lookup("RESID_LEDGER_DEADLINE_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::Invalid("RESID_LEDGER_DEADLINE_SECS".into(), e.to_string())
                })?;
                if secs == 0 {
                    return Err(ConfigError::Invalid(
                        "RESID_LEDGER_DEADLINE_SECS".into(),
                        "must be greater than zero".into(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => defaults.ledger_deadline,
        };

        Ok(Self {
            port,
            auth_token: lookup("AUTH_TOKEN")
                .filter(|t| !t.is_empty())
                .map(SecretToken::new),
            ledger_deadline,
            metadata_base_uri: lookup("RESID_METADATA_BASE_URI")
                .filter(|u| !u.trim().is_empty())
                .unwrap_or(defaults.metadata_base_uri),
            metrics_enabled: lookup("RESID_METRICS_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn IssuanceStore>,
    pub gate: EligibilityGate,
    pub coordinator: Option<IssuanceCoordinator>,
    pub db_pool: Option<PgPool>,
    pub metrics: ApiMetrics,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("ledger", &self.coordinator.is_some())
            .field("db_pool", &self.db_pool.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the services over `store` and, when present, `ledger`.
    ///
    /// Issuance events are logged and counted in [`ApiMetrics`].
    pub fn new(
        config: AppConfig,
        store: Arc<dyn IssuanceStore>,
        ledger: Option<Arc<dyn LedgerClient>>,
        db_pool: Option<PgPool>,
    ) -> Self {
        let metrics = ApiMetrics::new();
        let observer = ObserverSet::new()
            .with(Arc::new(TracingObserver))
            .with(Arc::new(metrics.clone()));
        let coordinator = ledger.map(|ledger| {
            IssuanceCoordinator::new(ledger, store.clone())
                .with_observer(Arc::new(observer))
                .with_metadata_base_uri(config.metadata_base_uri.clone())
        });
        Self {
            gate: EligibilityGate::new(store.clone()),
            config,
            store,
            coordinator,
            db_pool,
            metrics,
        }
    }

    /// The coordinator, or 503 when no ledger is configured.
    pub fn coordinator(&self) -> Result<&IssuanceCoordinator, AppError> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| AppError::service_unavailable("no ledger is configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.auth_token.is_none());
        assert_eq!(config.ledger_deadline, DEFAULT_LEDGER_DEADLINE);
        assert_eq!(config.metadata_base_uri, DEFAULT_METADATA_BASE_URI);
        assert!(config.metrics_enabled);
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "9090"),
            ("AUTH_TOKEN", "s3cret"),
            ("RESID_LEDGER_DEADLINE_SECS", "30"),
            ("RESID_METADATA_BASE_URI", "https://meta.example/r"),
            ("RESID_METRICS_ENABLED", "FALSE"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.auth_token.unwrap().expose(), "s3cret");
        assert_eq!(config.ledger_deadline, Duration::from_secs(30));
        assert_eq!(config.metadata_base_uri, "https://meta.example/r");
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(AppConfig::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("RESID_LEDGER_DEADLINE_SECS", "0")])).is_err());
    }

    #[test]
    fn empty_token_disables_auth() {
        let config = AppConfig::from_lookup(lookup(&[("AUTH_TOKEN", "")])).unwrap();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn debug_redacts_token() {
        let config = AppConfig::from_lookup(lookup(&[("AUTH_TOKEN", "s3cret")])).unwrap();
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
