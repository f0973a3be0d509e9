//! # Credential CLI: standalone reconciliation and status lookup.
//!
//! ```bash
//! # Rebuild a missing local record from the ledger:
//! resid reconcile --subject 7f3c9a --wallet 0xabc...
//!
//! # Show the local record for a subject:
//! resid status --subject 7f3c9a --json
//! ```
//!
//! Exit codes: `0` success, `1` failure or no record, `2` no token on the
//! ledger for the wallet.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use resid_core::{IssuanceRecord, SubjectId, WalletAddress};
use resid_issuance::{Deadline, IssuanceError, ReconciliationService, TracingObserver};
use resid_ledger::LedgerClient;
use resid_store::{IssuanceStore, RecordStore};

use crate::context;

/// Exit code when the wallet holds no residency token.
pub const EXIT_NO_TOKEN: u8 = 2;

/// Arguments for `resid reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Subject whose record should be rebuilt.
    #[arg(long)]
    pub subject: String,

    /// Wallet that holds the subject's token.
    #[arg(long)]
    pub wallet: String,

    /// Give up on the subject lock and ledger reads after this many seconds.
    #[arg(long, default_value_t = 120, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub deadline_secs: u64,
}

/// Arguments for `resid status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Subject to look up.
    #[arg(long)]
    pub subject: String,

    /// Print the full record as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute `resid reconcile`.
pub async fn run_reconcile(args: &ReconcileArgs) -> Result<u8> {
    let subject = SubjectId::new(args.subject.as_str()).context("invalid --subject")?;
    let wallet = WalletAddress::new(args.wallet.as_str()).context("invalid --wallet")?;
    let ledger = context::open_ledger()?;
    let store = context::open_store().await?;
    let deadline = Deadline::after(Duration::from_secs(args.deadline_secs));
    reconcile(ledger, store, &subject, &wallet, deadline).await
}

/// Execute `resid status`.
pub async fn run_status(args: &StatusArgs) -> Result<u8> {
    let subject = SubjectId::new(args.subject.as_str()).context("invalid --subject")?;
    let store = context::open_store().await?;
    status(&*store, &subject, args.json).await
}

pub(crate) async fn reconcile(
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn IssuanceStore>,
    subject: &SubjectId,
    wallet: &WalletAddress,
    deadline: Deadline,
) -> Result<u8> {
    let service =
        ReconciliationService::new(ledger, store).with_observer(Arc::new(TracingObserver));

    match service.sync_from_ledger(subject, wallet, deadline).await {
        Ok(record) => {
            println!("OK: reconciled {subject} from the ledger");
            print_summary(&record);
            Ok(0)
        }
        Err(IssuanceError::AlreadyReconciled(_)) => {
            println!("OK: {subject} already has a local record, nothing to do");
            Ok(0)
        }
        Err(IssuanceError::NoTokenOnLedger(_)) => {
            eprintln!("FAIL: wallet {wallet} holds no residency token");
            Ok(EXIT_NO_TOKEN)
        }
        Err(e) => {
            Err(anyhow::Error::new(e).context(format!("reconciliation of {subject} failed")))
        }
    }
}

pub(crate) async fn status(
    store: &dyn IssuanceStore,
    subject: &SubjectId,
    json: bool,
) -> Result<u8> {
    let record = store
        .find_by_subject(subject)
        .await
        .context("record lookup failed")?;

    let Some(record) = record else {
        eprintln!("No credential recorded for {subject}");
        return Ok(1);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_summary(&record);
    }
    Ok(0)
}

fn print_summary(record: &IssuanceRecord) {
    let token = record
        .token_id
        .as_ref()
        .map_or_else(|| "unknown".to_string(), ToString::to_string);
    println!("  Subject:     {}", record.subject_id);
    println!("  Wallet:      {}", record.wallet_address);
    println!("  Token:       {token}");
    println!("  Credential:  {}", record.metadata.human_readable_id);
    println!("  Issued at:   {}", record.metadata.issued_at.to_rfc3339());
    if record.has_write_provenance() {
        println!("  Transaction: {}", record.transaction_hash);
        println!("  Block:       {}", record.block_number);
    }
    if record.reconciled_from_ledger {
        println!("  Source:      reconciled from ledger");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resid_core::HumanReadableId;
    use resid_ledger::MockLedger;
    use resid_store::MemoryRecordStore;

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::new(format!("0x{}", format!("{n:02x}").repeat(20))).unwrap()
    }

    fn subject(s: &str) -> SubjectId {
        SubjectId::new(s).unwrap()
    }

    fn backends() -> (MockLedger, MemoryRecordStore) {
        (MockLedger::new(), MemoryRecordStore::new())
    }

    #[tokio::test]
    async fn reconcile_rebuilds_record() {
        let (ledger, store) = backends();
        let hrid = HumanReadableId::new("ERES-1700000000-ABCDEF").unwrap();
        ledger.preload_token(&wallet(1), "Ada", "EE", &hrid, 1_700_000_000);

        let code = reconcile(
            Arc::new(ledger.clone()),
            Arc::new(store.clone()),
            &subject("s-1"),
            &wallet(1),
            Deadline::default(),
        )
        .await
        .unwrap();
        assert_eq!(code, 0);

        let record = store.find_by_subject(&subject("s-1")).await.unwrap().unwrap();
        assert!(record.reconciled_from_ledger);
        assert_eq!(record.metadata.human_readable_id, hrid);
        assert_eq!(ledger.mint_calls(), 0);
    }

    #[tokio::test]
    async fn reconcile_twice_is_not_an_error() {
        let (ledger, store) = backends();
        let hrid = HumanReadableId::new("ERES-1700000000-ABCDEF").unwrap();
        ledger.preload_token(&wallet(1), "Ada", "EE", &hrid, 1_700_000_000);

        for _ in 0..2 {
            let code = reconcile(
                Arc::new(ledger.clone()),
                Arc::new(store.clone()),
                &subject("s-1"),
                &wallet(1),
                Deadline::default(),
            )
            .await
            .unwrap();
            assert_eq!(code, 0);
        }
    }

    #[tokio::test]
    async fn reconcile_without_token_exits_two() {
        let (ledger, store) = backends();
        let code = reconcile(
            Arc::new(ledger),
            Arc::new(store.clone()),
            &subject("s-1"),
            &wallet(1),
            Deadline::default(),
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_NO_TOKEN);
        assert!(store.find_by_subject(&subject("s-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_surfaces_ledger_outage() {
        let (ledger, store) = backends();
        ledger.set_unavailable(true);
        let err = reconcile(
            Arc::new(ledger),
            Arc::new(store),
            &subject("s-1"),
            &wallet(1),
            Deadline::default(),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("ledger unavailable"));
    }

    #[tokio::test]
    async fn status_reports_missing_record() {
        let store = MemoryRecordStore::new();
        assert_eq!(status(&store, &subject("nobody"), false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn status_after_reconcile() {
        let (ledger, store) = backends();
        let hrid = HumanReadableId::new("ERES-1700000000-ABCDEF").unwrap();
        ledger.preload_token(&wallet(3), "Ada", "EE", &hrid, 1_700_000_000);
        reconcile(
            Arc::new(ledger),
            Arc::new(store.clone()),
            &subject("s-3"),
            &wallet(3),
            Deadline::default(),
        )
        .await
        .unwrap();

        assert_eq!(status(&store, &subject("s-3"), false).await.unwrap(), 0);
        assert_eq!(status(&store, &subject("s-3"), true).await.unwrap(), 0);
    }
}
