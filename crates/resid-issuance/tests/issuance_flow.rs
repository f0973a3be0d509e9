//! End-to-end issuance scenarios over the mock ledger and the memory store.
//!
//! | Scenario | Test |
//! |----------|------|
//! | approved subject mints once | `approved_subject_mints_once` |
//! | concurrent double mint | `concurrent_mints_for_one_subject_yield_one_credential` |
//! | unrecorded prior mint self-heals | `unrecorded_prior_mint_self_heals` |
//! | malformed wallet never reaches ledger | `malformed_wallet_is_rejected_before_ledger` |
//! | sync twice | `second_sync_is_already_reconciled` |
//! | metadata snapshot frozen | `metadata_is_not_live_synced_with_profile` |
//! | mint and sync agree | `mint_and_sync_build_the_same_credential` |
//! | expired deadline never reaches ledger | `expired_deadline_never_reaches_ledger` |
//! | slow ledger reads bounded by deadline | `recovery_reads_are_bounded_by_deadline`, `sync_reads_are_bounded_by_deadline` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use resid_core::{SubjectId, SubjectProfile, TokenId, VerificationStatus, WalletAddress};
use resid_issuance::{
    Deadline, ErrorKind, IssuanceCoordinator, IssuanceError, IssuanceEvent, ReconcileTrigger,
    RecordingObserver,
};
use resid_ledger::{
    LedgerClient, LedgerError, MintReceipt, MintRequest, MockLedger, OnChainTokenData, TokenProbe,
};
use resid_store::{MemoryRecordStore, ProfileDirectory, RecordStore};

struct Harness {
    ledger: MockLedger,
    store: MemoryRecordStore,
    observer: Arc<RecordingObserver>,
    coordinator: IssuanceCoordinator,
}

fn harness() -> Harness {
    let ledger = MockLedger::new();
    let store = MemoryRecordStore::new();
    let observer = Arc::new(RecordingObserver::new());
    let coordinator = IssuanceCoordinator::new(Arc::new(ledger.clone()), Arc::new(store.clone()))
        .with_observer(observer.clone())
        .with_metadata_base_uri("https://meta.example/residency/");
    Harness {
        ledger,
        store,
        observer,
        coordinator,
    }
}

fn subject(s: &str) -> SubjectId {
    SubjectId::new(s).unwrap()
}

fn wallet(n: u8) -> String {
    format!("0x{}", format!("{n:02x}").repeat(20))
}

fn wallet_addr(n: u8) -> WalletAddress {
    WalletAddress::new(wallet(n)).unwrap()
}

async fn approve(store: &MemoryRecordStore, s: &str) {
    let profile = SubjectProfile::new(subject(s), "Ada Lovelace", "EE")
        .unwrap()
        .with_status(VerificationStatus::Approved);
    store.upsert_profile(&profile).await.unwrap();
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

/// Ledger that refuses every mint as already issued and answers token
/// lookups only after `read_delay`.
#[derive(Debug)]
struct SlowReadLedger {
    inner: MockLedger,
    read_delay: Duration,
}

#[async_trait]
impl LedgerClient for SlowReadLedger {
    fn contract_address(&self) -> &WalletAddress {
        self.inner.contract_address()
    }

    async fn submit_mint(&self, request: &MintRequest) -> Result<MintReceipt, LedgerError> {
        Err(LedgerError::AlreadyIssuedOnLedger {
            wallet: request.wallet.to_string(),
        })
    }

    async fn has_token(&self, wallet: &WalletAddress) -> Result<TokenProbe, LedgerError> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.has_token(wallet).await
    }

    async fn read_token_data(
        &self,
        token_id: &TokenId,
        wallet: &WalletAddress,
    ) -> Result<OnChainTokenData, LedgerError> {
        self.inner.read_token_data(token_id, wallet).await
    }
}

fn slow_read_coordinator(store: &MemoryRecordStore) -> IssuanceCoordinator {
    let inner = MockLedger::new();
    let hrid = resid_core::HumanReadableId::new("ERES-1700000000000-00FF00").unwrap();
    inner.preload_token(&wallet_addr(20), "Ada Lovelace", "EE", &hrid, 1_700_000_000);
    let ledger = SlowReadLedger {
        inner,
        read_delay: Duration::from_secs(2),
    };
    IssuanceCoordinator::new(Arc::new(ledger), Arc::new(store.clone()))
}

// ── Mint ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn approved_subject_mints_once() {
    let h = harness();
    approve(&h.store, "S1").await;

    let outcome = h.coordinator.mint("S1", &wallet(1), deadline()).await.unwrap();
    assert!(!outcome.synced);
    assert!(!outcome.transaction_hash.clone().unwrap().is_empty());
    assert!(!outcome.token_id.clone().unwrap().as_str().is_empty());
    assert!(outcome.human_readable_id.is_generated_form());
    assert_eq!(&outcome.ledger_contract_address, resid_ledger::LedgerClient::contract_address(&h.ledger));
    assert_eq!(
        outcome.record.metadata.token_uri.as_deref(),
        Some(format!("https://meta.example/residency/{}", outcome.human_readable_id).as_str())
    );

    let stored = h.store.find_by_subject(&subject("S1")).await.unwrap().unwrap();
    assert_eq!(stored, outcome.record);
    assert!(!stored.reconciled_from_ledger);
    assert!(stored.has_write_provenance());

    let profile = h.store.profile(&subject("S1")).await.unwrap().unwrap();
    assert_eq!(profile.wallet_address, Some(wallet_addr(1)));
    assert_eq!(profile.credential_id, Some(outcome.human_readable_id.clone()));

    assert_eq!(h.observer.events(), vec![IssuanceEvent::Minted(outcome.record)]);

    let again = h.coordinator.mint("S1", &wallet(1), deadline()).await.unwrap_err();
    assert_eq!(again, IssuanceError::AlreadyIssued("S1".into()));
    assert_eq!(h.ledger.mint_calls(), 1);
}

#[tokio::test]
async fn concurrent_mints_for_one_subject_yield_one_credential() {
    let h = harness();
    approve(&h.store, "S2").await;
    h.ledger.set_mint_latency(Duration::from_millis(50));

    let a = h.coordinator.clone();
    let b = h.coordinator.clone();
    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.mint("S2", &wallet(2), deadline()).await }),
        tokio::spawn(async move { b.mint("S2", &wallet(2), deadline()).await }),
    );
    let results = [first.unwrap(), second.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "{results:?}");
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(
        matches!(
            failure.kind(),
            ErrorKind::AlreadyIssued | ErrorKind::DuplicateSubject
        ),
        "{failure:?}"
    );
    assert_eq!(h.ledger.mint_calls(), 1);
    assert_eq!(h.store.record_count(), 1);
}

#[tokio::test]
async fn malformed_wallet_is_rejected_before_ledger() {
    let h = harness();
    approve(&h.store, "S3").await;

    let err = h.coordinator.mint("S3", "not-an-address", deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err = h.coordinator.mint("", &wallet(3), deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert_eq!(h.ledger.mint_calls(), 0);
    assert_eq!(h.ledger.read_calls(), 0);
    assert_eq!(h.store.record_count(), 0);
}

#[tokio::test]
async fn unverified_subject_never_reaches_ledger() {
    let h = harness();
    let err = h.coordinator.mint("nobody", &wallet(4), deadline()).await.unwrap_err();
    assert_eq!(err, IssuanceError::NotVerified("nobody".into()));

    let pending = SubjectProfile::new(subject("pending"), "Grace", "US")
        .unwrap()
        .with_status(VerificationStatus::Pending);
    h.store.upsert_profile(&pending).await.unwrap();
    let err = h.coordinator.mint("pending", &wallet(4), deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotVerified);
    assert_eq!(h.ledger.mint_calls(), 0);
}

#[tokio::test]
async fn ledger_outage_is_retryable_and_leaves_no_record() {
    let h = harness();
    approve(&h.store, "S5").await;
    h.ledger.set_unavailable(true);

    let err = h.coordinator.mint("S5", &wallet(5), deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerUnavailable);
    assert!(err.is_retryable());
    assert_eq!(h.store.record_count(), 0);

    h.ledger.set_unavailable(false);
    assert!(h.coordinator.mint("S5", &wallet(5), deadline()).await.is_ok());
}

#[tokio::test]
async fn insufficient_funds_surfaces_unchanged() {
    let h = harness();
    approve(&h.store, "S6").await;
    h.ledger
        .fail_next_mint(LedgerError::InsufficientFunds("balance 0".into()));

    let err = h.coordinator.mint("S6", &wallet(6), deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert!(!err.is_retryable());
    assert_eq!(h.store.record_count(), 0);
}

// ── Recovery ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unrecorded_prior_mint_self_heals() {
    let h = harness();
    approve(&h.store, "S7").await;
    let hrid = resid_core::HumanReadableId::new("ERES-1700000000000-ABC123").unwrap();
    let token = h
        .ledger
        .preload_token(&wallet_addr(7), "Ada Lovelace", "EE", &hrid, 1_700_000_000);

    let outcome = h.coordinator.mint("S7", &wallet(7), deadline()).await.unwrap();
    assert!(outcome.synced);
    assert!(outcome.transaction_hash.is_none());
    assert_eq!(outcome.token_id, Some(token.clone()));
    assert_eq!(outcome.human_readable_id, hrid);

    let stored = h.store.find_by_subject(&subject("S7")).await.unwrap().unwrap();
    assert_eq!(stored.token_id, Some(token));
    assert!(stored.reconciled_from_ledger);
    assert!(!stored.has_write_provenance());
    assert_eq!(stored.metadata.issued_at.timestamp(), 1_700_000_000);

    let profile = h.store.profile(&subject("S7")).await.unwrap().unwrap();
    assert_eq!(profile.credential_id, Some(hrid));

    assert!(matches!(
        h.observer.events().as_slice(),
        [IssuanceEvent::Reconciled {
            trigger: ReconcileTrigger::MintRecovery,
            ..
        }]
    ));
}

#[tokio::test]
async fn failed_reconciliation_is_reported_with_both_causes() {
    let h = harness();
    approve(&h.store, "S8").await;
    // The ledger claims the wallet is credentialed but holds no token for it.
    h.ledger.fail_next_mint(LedgerError::AlreadyIssuedOnLedger {
        wallet: wallet(8),
    });

    let err = h.coordinator.mint("S8", &wallet(8), deadline()).await.unwrap_err();
    match err {
        IssuanceError::AlreadyIssuedOnLedger {
            wallet: w,
            reconciliation,
        } => {
            assert_eq!(w, wallet(8));
            assert_eq!(reconciliation.kind(), ErrorKind::NoTokenOnLedger);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.store.record_count(), 0);
}

#[tokio::test]
async fn wallet_of_another_subject_is_not_rebound() {
    let h = harness();
    approve(&h.store, "owner").await;
    approve(&h.store, "intruder").await;
    h.coordinator.mint("owner", &wallet(9), deadline()).await.unwrap();

    let err = h.coordinator.mint("intruder", &wallet(9), deadline()).await.unwrap_err();
    match err {
        IssuanceError::AlreadyIssuedOnLedger { reconciliation, .. } => {
            assert_eq!(reconciliation.kind(), ErrorKind::WalletBoundToOtherSubject)
        }
        other => panic!("unexpected {other:?}"),
    }

    let err = h
        .coordinator
        .reconciliation()
        .sync_from_ledger(&subject("intruder"), &wallet_addr(9), deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WalletBoundToOtherSubject);
    assert_eq!(h.store.record_count(), 1);
}

#[tokio::test]
async fn deadline_expiry_times_out_and_next_mint_heals() {
    let h = harness();
    approve(&h.store, "S10").await;
    h.ledger.set_mint_latency(Duration::from_millis(200));

    let err = h
        .coordinator
        .mint("S10", &wallet(10), Deadline::after(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert_eq!(err, IssuanceError::LedgerTimeout);
    assert!(err.is_retryable());
    assert_eq!(h.store.record_count(), 0);

    // The detached mint still lands on the ledger.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.ledger.token_count(), 1);

    h.ledger.set_mint_latency(Duration::ZERO);
    let outcome = h.coordinator.mint("S10", &wallet(10), deadline()).await.unwrap();
    assert!(outcome.synced);
    assert_eq!(h.ledger.token_count(), 1);
}

#[tokio::test]
async fn expired_deadline_never_reaches_ledger() {
    let h = harness();
    approve(&h.store, "S17").await;

    let expired = Deadline::at(Instant::now() - Duration::from_millis(1));
    let err = h.coordinator.mint("S17", &wallet(17), expired).await.unwrap_err();
    assert_eq!(err, IssuanceError::LedgerTimeout);

    // Nothing was left running in the background either.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.ledger.mint_calls(), 0);
    assert_eq!(h.ledger.token_count(), 0);
    assert_eq!(h.store.record_count(), 0);

    let outcome = h.coordinator.mint("S17", &wallet(17), deadline()).await.unwrap();
    assert!(!outcome.synced);
    assert_eq!(h.ledger.mint_calls(), 1);
}

#[tokio::test]
async fn lock_wait_is_bounded_by_deadline() {
    let h = harness();
    approve(&h.store, "S18").await;
    h.ledger.set_mint_latency(Duration::from_millis(300));

    let holder = h.coordinator.clone();
    let first = tokio::spawn(async move { holder.mint("S18", &wallet(18), deadline()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let err = h
        .coordinator
        .mint("S18", &wallet(18), Deadline::after(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert_eq!(err, IssuanceError::LedgerTimeout);
    assert!(started.elapsed() < Duration::from_millis(250), "{:?}", started.elapsed());

    assert!(first.await.unwrap().is_ok());
    assert_eq!(h.ledger.mint_calls(), 1);
    assert_eq!(h.store.record_count(), 1);
}

#[tokio::test]
async fn recovery_reads_are_bounded_by_deadline() {
    let store = MemoryRecordStore::new();
    approve(&store, "S20").await;
    let coordinator = slow_read_coordinator(&store);

    let started = Instant::now();
    let err = coordinator
        .mint("S20", &wallet(20), Deadline::after(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert_eq!(err, IssuanceError::LedgerTimeout);
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn sync_reads_are_bounded_by_deadline() {
    let store = MemoryRecordStore::new();
    let coordinator = slow_read_coordinator(&store);

    let started = Instant::now();
    let err = coordinator
        .reconciliation()
        .sync_from_ledger(
            &subject("S20"),
            &wallet_addr(20),
            Deadline::after(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(err, IssuanceError::LedgerTimeout);
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn persist_failure_is_reported_and_healed_by_sync() {
    let h = harness();
    approve(&h.store, "S11").await;
    h.store.fail_next_commits(1);

    let err = h.coordinator.mint("S11", &wallet(11), deadline()).await.unwrap_err();
    let minted_token = match &err {
        IssuanceError::StorePersistFailure {
            transaction_hash,
            token_id,
            ..
        } => {
            assert!(!transaction_hash.is_empty());
            token_id.clone()
        }
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(h.store.record_count(), 0);
    assert!(matches!(
        h.observer.events().as_slice(),
        [IssuanceEvent::Diverged { .. }]
    ));

    let record = h
        .coordinator
        .reconciliation()
        .sync_from_ledger(&subject("S11"), &wallet_addr(11), deadline())
        .await
        .unwrap();
    assert_eq!(record.token_id.unwrap().as_str(), minted_token);
}

// ── Sync ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_sync_is_already_reconciled() {
    let h = harness();
    let hrid = resid_core::HumanReadableId::new("ERES-1-000001").unwrap();
    h.ledger
        .preload_token(&wallet_addr(12), "Grace", "US", &hrid, 1_600_000_000);
    let reconciliation = h.coordinator.reconciliation();

    let first = reconciliation
        .sync_from_ledger(&subject("S12"), &wallet_addr(12), deadline())
        .await
        .unwrap();
    let err = reconciliation
        .sync_from_ledger(&subject("S12"), &wallet_addr(12), deadline())
        .await
        .unwrap_err();
    assert_eq!(err, IssuanceError::AlreadyReconciled("S12".into()));

    let stored = h.store.find_by_subject(&subject("S12")).await.unwrap().unwrap();
    assert_eq!(stored, first);
    assert!(matches!(
        h.observer.events().as_slice(),
        [IssuanceEvent::Reconciled {
            trigger: ReconcileTrigger::Standalone,
            ..
        }]
    ));
}

#[tokio::test]
async fn sync_without_token_fails() {
    let h = harness();
    let err = h
        .coordinator
        .reconciliation()
        .sync_from_ledger(&subject("S13"), &wallet_addr(13), deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoTokenOnLedger);
    assert_eq!(h.store.record_count(), 0);
}

#[tokio::test]
async fn metadata_is_not_live_synced_with_profile() {
    let h = harness();
    approve(&h.store, "S14").await;
    h.coordinator.mint("S14", &wallet(14), deadline()).await.unwrap();

    let edited = SubjectProfile::new(subject("S14"), "Ada King", "GB")
        .unwrap()
        .with_status(VerificationStatus::Approved);
    h.store.upsert_profile(&edited).await.unwrap();

    let stored = h.store.find_by_subject(&subject("S14")).await.unwrap().unwrap();
    assert_eq!(stored.metadata.display_name, "Ada Lovelace");
    assert_eq!(stored.metadata.nationality_code, "EE");
}

#[tokio::test]
async fn mint_and_sync_build_the_same_credential() {
    let h = harness();
    approve(&h.store, "S15").await;
    let minted = h.coordinator.mint("S15", &wallet(15), deadline()).await.unwrap();

    // A second deployment with an empty store sees the same ledger.
    let fresh = MemoryRecordStore::new();
    let other = IssuanceCoordinator::new(Arc::new(h.ledger.clone()), Arc::new(fresh));
    let synced = other
        .reconciliation()
        .sync_from_ledger(&subject("S15"), &wallet_addr(15), deadline())
        .await
        .unwrap();

    assert_eq!(synced.token_id, minted.record.token_id);
    assert_eq!(synced.ledger_contract_address, minted.record.ledger_contract_address);
    assert_eq!(
        synced.metadata.human_readable_id,
        minted.record.metadata.human_readable_id
    );
    assert_eq!(synced.metadata.token_uri, minted.record.metadata.token_uri);
    assert!(synced.reconciled_from_ledger);
}

#[tokio::test]
async fn eligibility_check_reports_reason() {
    let h = harness();
    approve(&h.store, "S16").await;
    assert!(h.coordinator.gate().check_eligible(&subject("S16")).await.unwrap().eligible);
    h.coordinator.mint("S16", &wallet(16), deadline()).await.unwrap();
    let answer = h.coordinator.gate().check_eligible(&subject("S16")).await.unwrap();
    assert!(!answer.eligible);
    assert!(answer.reason.is_some());
}
