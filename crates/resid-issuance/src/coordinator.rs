//! # Issuance Coordinator
//!
//! End-to-end mint-and-persist workflow for one subject.
//!
//! ## Flow
//!
//! 1. Validate the subject id and wallet address. Nothing else happens on
//!    bad input; in particular the ledger is not called.
//! 2. Open a unit of work and run the [`EligibilityGate`].
//! 3. Lock the subject and re-check for a record inside the unit of work,
//!    so concurrent requests for one subject cannot both reach the ledger.
//! 4. Mint on the ledger, bounded by the caller's [`Deadline`].
//!
//! The deadline also bounds the lock wait in step 3 and the ledger reads of
//! any reconciliation. It is checked again before the mint is submitted: a
//! request whose deadline has passed by then fails with
//! [`IssuanceError::LedgerTimeout`] and never reaches the ledger.
//! 5. Create the record and link the profile in the same unit of work,
//!    then commit.
//!
//! When the ledger reports that the wallet already holds a token, step 5
//! is replaced by reconciliation inside the same unit of work and the
//! outcome is reported with `synced = true`.
//!
//! ## Divergence
//!
//! The ledger and the store share no commit protocol. If the mint succeeds
//! and the local write then fails, the token exists without a record. That
//! state is reported as [`IssuanceError::StorePersistFailure`], logged at
//! `error`, and repaired by the next mint or sync for the subject, which
//! finds the token on the ledger and reconciles.
//!
//! Once submitted, the mint runs on its own task. A caller that gives up
//! (deadline, disconnect) does not cancel it; the task logs the outcome.

use std::sync::Arc;

use chrono::Utc;
use resid_core::{
    CredentialMetadata, HumanReadableId, IssuanceRecord, RecordId, SubjectId, SubjectProfile,
    TokenId, WalletAddress,
};
use resid_ledger::{LedgerClient, LedgerError, MintReceipt, MintRequest};
use resid_store::{IssuanceStore, StoreError, StoreTransaction};

use crate::deadline::Deadline;
use crate::eligibility::EligibilityGate;
use crate::error::IssuanceError;
use crate::observer::{IssuanceEvent, IssuanceObserver, ReconcileTrigger, TracingObserver};
use crate::reconciliation::ReconciliationService;
use crate::state::{IssuanceState, StateTracker};

/// Default prefix for token metadata URIs.
pub const DEFAULT_METADATA_BASE_URI: &str = "ipfs://residency";

/// Result of a successful [`IssuanceCoordinator::mint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintOutcome {
    /// Minting transaction; `None` when the record was reconciled.
    pub transaction_hash: Option<String>,
    /// Token on the ledger.
    pub token_id: Option<TokenId>,
    /// Correlation id stored on-chain and in the record.
    pub human_readable_id: HumanReadableId,
    /// Issuing contract.
    pub ledger_contract_address: WalletAddress,
    /// Whether the record was rebuilt from an existing token.
    pub synced: bool,
    /// The committed record.
    pub record: IssuanceRecord,
}

/// Staged result of the ledger phase, awaiting commit.
struct Staged {
    record: IssuanceRecord,
    receipt: Option<MintReceipt>,
}

/// Orchestrates eligibility, ledger mint and local persistence.
#[derive(Clone)]
pub struct IssuanceCoordinator {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn IssuanceStore>,
    gate: EligibilityGate,
    reconciliation: ReconciliationService,
    observer: Arc<dyn IssuanceObserver>,
    metadata_base_uri: String,
}

impl std::fmt::Debug for IssuanceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceCoordinator")
            .field("ledger", &self.ledger)
            .field("metadata_base_uri", &self.metadata_base_uri)
            .finish_non_exhaustive()
    }
}

impl IssuanceCoordinator {
    /// Coordinator over `ledger` and `store` with a logging observer.
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<dyn IssuanceStore>) -> Self {
        let observer: Arc<dyn IssuanceObserver> = Arc::new(TracingObserver);
        Self {
            gate: EligibilityGate::new(Arc::clone(&store)),
            reconciliation: ReconciliationService::new(Arc::clone(&ledger), Arc::clone(&store))
                .with_observer(Arc::clone(&observer)),
            ledger,
            store,
            observer,
            metadata_base_uri: DEFAULT_METADATA_BASE_URI.to_string(),
        }
    }

    /// Replace the observer, for mints and standalone syncs alike.
    pub fn with_observer(mut self, observer: Arc<dyn IssuanceObserver>) -> Self {
        self.reconciliation = self.reconciliation.with_observer(Arc::clone(&observer));
        self.observer = observer;
        self
    }

    /// Set the prefix under which token metadata URIs are built.
    pub fn with_metadata_base_uri(mut self, base: impl Into<String>) -> Self {
        self.metadata_base_uri = base.into();
        self
    }

    /// The eligibility gate.
    pub fn gate(&self) -> &EligibilityGate {
        &self.gate
    }

    /// The reconciliation service sharing this coordinator's ledger and store.
    pub fn reconciliation(&self) -> &ReconciliationService {
        &self.reconciliation
    }

    /// Issue a residency credential to `wallet_address` for `subject_id`.
    ///
    /// # Errors
    ///
    /// Gate errors ([`IssuanceError::NotVerified`], [`IssuanceError::AlreadyIssued`])
    /// are returned unchanged. Ledger failures surface with their own kind
    /// and are never retried here. See the module docs for
    /// [`IssuanceError::StorePersistFailure`].
    pub async fn mint(
        &self,
        subject_id: &str,
        wallet_address: &str,
        deadline: Deadline,
    ) -> Result<MintOutcome, IssuanceError> {
        let subject =
            SubjectId::new(subject_id).map_err(|e| IssuanceError::InvalidInput(e.to_string()))?;
        let wallet = WalletAddress::new(wallet_address)
            .map_err(|e| IssuanceError::InvalidInput(e.to_string()))?;
        let mut state = StateTracker::new(subject.clone());

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                state.fail();
                return Err(e.into());
            }
        };

        let staged = match self
            .stage(tx.as_mut(), &subject, &wallet, deadline, &mut state)
            .await
        {
            Ok(staged) => staged,
            Err(e) => {
                state.fail();
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(subject = %subject, error = %rollback, "rollback failed");
                }
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            state.fail();
            return Err(match &staged.receipt {
                Some(receipt) => self.diverged(&subject, &wallet, receipt, e),
                None => e.into(),
            });
        }
        state.advance(IssuanceState::Persisted);

        let record = staged.record;
        let outcome = match staged.receipt {
            Some(receipt) => {
                self.observer.notify(&IssuanceEvent::Minted(record.clone()));
                MintOutcome {
                    transaction_hash: Some(receipt.transaction_hash),
                    token_id: record.token_id.clone(),
                    human_readable_id: record.metadata.human_readable_id.clone(),
                    ledger_contract_address: record.ledger_contract_address.clone(),
                    synced: false,
                    record,
                }
            }
            None => {
                self.observer.notify(&IssuanceEvent::Reconciled {
                    record: record.clone(),
                    trigger: ReconcileTrigger::MintRecovery,
                });
                MintOutcome {
                    transaction_hash: None,
                    token_id: record.token_id.clone(),
                    human_readable_id: record.metadata.human_readable_id.clone(),
                    ledger_contract_address: record.ledger_contract_address.clone(),
                    synced: true,
                    record,
                }
            }
        };
        Ok(outcome)
    }

    /// Everything between opening and committing the unit of work.
    async fn stage(
        &self,
        tx: &mut dyn StoreTransaction,
        subject: &SubjectId,
        wallet: &WalletAddress,
        deadline: Deadline,
        state: &mut StateTracker,
    ) -> Result<Staged, IssuanceError> {
        let profile = self.gate.require_eligible(subject).await?;
        state.advance(IssuanceState::EligibilityChecked);

        deadline.bound(tx.lock_subject(subject)).await?;
        if tx.find_by_subject(subject).await?.is_some() {
            return Err(IssuanceError::AlreadyIssued(subject.to_string()));
        }
        if deadline.is_expired() {
            tracing::warn!(subject = %subject, "deadline passed before ledger submission");
            return Err(IssuanceError::LedgerTimeout);
        }

        let human_readable_id = HumanReadableId::generate(Utc::now());
        let metadata_uri = format!(
            "{}/{}",
            self.metadata_base_uri.trim_end_matches('/'),
            human_readable_id
        );
        let request = MintRequest {
            wallet: wallet.clone(),
            display_name: profile.display_name.clone(),
            nationality_code: profile.nationality_code.clone(),
            human_readable_id: human_readable_id.clone(),
            metadata_uri: metadata_uri.clone(),
        };

        state.advance(IssuanceState::LedgerSubmitted);
        match self.submit_detached(request, deadline).await? {
            Ok(receipt) => {
                let record = self.record_from_receipt(
                    subject,
                    wallet,
                    profile,
                    &receipt,
                    human_readable_id,
                    metadata_uri,
                );
                if let Err(e) = tx.create(&record).await {
                    return Err(self.diverged(subject, wallet, &receipt, e));
                }
                if let Err(e) = tx
                    .link_profile(subject, wallet, &record.metadata.human_readable_id)
                    .await
                {
                    return Err(self.diverged(subject, wallet, &receipt, e));
                }
                Ok(Staged {
                    record,
                    receipt: Some(receipt),
                })
            }
            Err(LedgerError::AlreadyIssuedOnLedger { .. }) => {
                tracing::info!(
                    subject = %subject,
                    wallet = %wallet,
                    "wallet already credentialed on ledger, reconciling"
                );
                state.advance(IssuanceState::LedgerRejectedAlreadyIssued);
                state.advance(IssuanceState::Reconciling);
                match self
                    .reconciliation
                    .reconcile_within(tx, subject, wallet, deadline)
                    .await
                {
                    Ok(record) => Ok(Staged {
                        record,
                        receipt: None,
                    }),
                    Err(IssuanceError::LedgerTimeout) => Err(IssuanceError::LedgerTimeout),
                    Err(e) => Err(IssuanceError::AlreadyIssuedOnLedger {
                        wallet: wallet.to_string(),
                        reconciliation: Box::new(e),
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run the mint on its own task and wait for it until `deadline`.
    ///
    /// The outer error covers the wait (deadline, task failure); the inner
    /// result is the ledger's answer. Nothing is spawned once the deadline
    /// has passed.
    async fn submit_detached(
        &self,
        request: MintRequest,
        deadline: Deadline,
    ) -> Result<Result<MintReceipt, LedgerError>, IssuanceError> {
        if deadline.is_expired() {
            return Err(IssuanceError::LedgerTimeout);
        }
        let ledger = Arc::clone(&self.ledger);
        let task = tokio::spawn(async move {
            let result = ledger.submit_mint(&request).await;
            match &result {
                Ok(receipt) => tracing::info!(
                    wallet = %request.wallet,
                    residency_id = %request.human_readable_id,
                    tx_hash = %receipt.transaction_hash,
                    token_id = %receipt.token_id,
                    "ledger mint finished"
                ),
                Err(e) => tracing::warn!(
                    wallet = %request.wallet,
                    residency_id = %request.human_readable_id,
                    error = %e,
                    "ledger mint failed"
                ),
            }
            result
        });

        match tokio::time::timeout_at(deadline.instant(), task).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(join)) => Err(IssuanceError::LedgerUnavailable(format!(
                "ledger task aborted: {join}"
            ))),
            Err(_) => {
                tracing::warn!("ledger phase exceeded deadline; mint continues in background");
                Err(IssuanceError::LedgerTimeout)
            }
        }
    }

    fn record_from_receipt(
        &self,
        subject: &SubjectId,
        wallet: &WalletAddress,
        profile: SubjectProfile,
        receipt: &MintReceipt,
        human_readable_id: HumanReadableId,
        metadata_uri: String,
    ) -> IssuanceRecord {
        let now = Utc::now();
        IssuanceRecord {
            id: RecordId::new(),
            subject_id: subject.clone(),
            wallet_address: wallet.clone(),
            token_id: Some(receipt.token_id.clone()),
            ledger_contract_address: self.ledger.contract_address().clone(),
            transaction_hash: receipt.transaction_hash.clone(),
            metadata: CredentialMetadata {
                display_name: profile.display_name,
                nationality_code: profile.nationality_code,
                issued_at: now,
                human_readable_id,
                token_uri: Some(metadata_uri),
            },
            block_number: receipt.block_number,
            block_hash: receipt.block_hash.clone(),
            reconciled_from_ledger: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Report a minted token whose record could not be stored.
    fn diverged(
        &self,
        subject: &SubjectId,
        wallet: &WalletAddress,
        receipt: &MintReceipt,
        cause: StoreError,
    ) -> IssuanceError {
        tracing::error!(
            subject = %subject,
            wallet = %wallet,
            tx_hash = %receipt.transaction_hash,
            token_id = %receipt.token_id,
            error = %cause,
            "credential minted but local record not stored; next mint or sync will reconcile"
        );
        self.observer.notify(&IssuanceEvent::Diverged {
            subject_id: subject.clone(),
            wallet_address: wallet.clone(),
            transaction_hash: receipt.transaction_hash.clone(),
            token_id: receipt.token_id.clone(),
        });
        match cause {
            StoreError::DuplicateSubject(s) => IssuanceError::DuplicateSubject(s),
            StoreError::DuplicateWallet(w) => IssuanceError::WalletBoundToOtherSubject(w),
            other => IssuanceError::StorePersistFailure {
                transaction_hash: receipt.transaction_hash.clone(),
                token_id: receipt.token_id.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
