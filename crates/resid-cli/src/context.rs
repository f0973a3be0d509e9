//! # Backend Wiring
//!
//! Builds the record store and ledger client from the same environment
//! variables the API server reads, so the CLI operates on the server's
//! data.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use resid_ledger::{EvmLedgerClient, EvmLedgerConfig, LedgerClient, LedgerMode, MockLedger};
use resid_store::{IssuanceStore, MemoryRecordStore, PgRecordStore};

/// Open the record store named by `DATABASE_URL`.
///
/// Without it an empty in-memory store is returned, which is only useful
/// for dry runs against the mock ledger.
pub async fn open_store() -> Result<Arc<dyn IssuanceStore>> {
    let pool = resid_store::init_pool()
        .await
        .context("failed to connect to the record store")?;
    Ok(match pool {
        Some(pool) => Arc::new(PgRecordStore::new(pool)),
        None => Arc::new(MemoryRecordStore::new()),
    })
}

/// Build the ledger client selected by `RESID_LEDGER_MODE`.
pub fn open_ledger() -> Result<Arc<dyn LedgerClient>> {
    match LedgerMode::from_env()? {
        LedgerMode::Rpc => {
            let config = EvmLedgerConfig::from_env().context("invalid ledger configuration")?;
            let client = EvmLedgerClient::new(config).context("failed to build ledger client")?;
            tracing::info!(contract = %client.contract_address(), "using EVM ledger");
            Ok(Arc::new(client))
        }
        LedgerMode::Mock => {
            tracing::warn!("using the in-process mock ledger");
            Ok(Arc::new(MockLedger::new()))
        }
        LedgerMode::Disabled => {
            bail!("no ledger configured: set RESID_LEDGER_RPC_URL or RESID_LEDGER_MODE")
        }
    }
}
