//! # resid-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the residency credential API.
//! Binds to configurable port (default 8080).

use std::sync::Arc;

use resid_api::state::{AppConfig, AppState};
use resid_ledger::{EvmLedgerClient, EvmLedgerConfig, LedgerClient, LedgerMode, MockLedger};
use resid_store::{IssuanceStore, MemoryRecordStore, PgRecordStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {e}");
        e
    })?;
    let port = config.port;

    // Absent DATABASE_URL means in-memory only.
    let db_pool = resid_store::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;
    let store: Arc<dyn IssuanceStore> = match &db_pool {
        Some(pool) => Arc::new(PgRecordStore::new(pool.clone())),
        None => Arc::new(MemoryRecordStore::new()),
    };

    let ledger: Option<Arc<dyn LedgerClient>> = match LedgerMode::from_env()? {
        LedgerMode::Rpc => {
            let ledger_config = EvmLedgerConfig::from_env().map_err(|e| {
                tracing::error!("Ledger configuration invalid: {e}");
                e
            })?;
            let client = EvmLedgerClient::new(ledger_config)?;
            tracing::info!(contract = %client.contract_address(), "EVM ledger client configured");
            Some(Arc::new(client))
        }
        LedgerMode::Mock => {
            tracing::warn!("Using the in-process mock ledger. Credentials are not on a real chain.");
            Some(Arc::new(MockLedger::new()))
        }
        LedgerMode::Disabled => {
            tracing::warn!("No ledger configured. Mint and sync endpoints will return 503.");
            None
        }
    };

    let state = AppState::new(config, store, ledger, db_pool);
    let app = resid_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Residency API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
