//! # Reconciliation Service
//!
//! Repairs divergence between the ledger and the record store by pulling
//! the authoritative on-chain token into a local record. The ledger is the
//! source of truth: reconciliation only ever creates records for tokens
//! that exist, and never changes an existing record.
//!
//! Records built here carry `reconciled_from_ledger = true` and no write
//! provenance (empty transaction hash, block 0, empty block hash), since
//! the minting transaction is not discoverable from a view call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use resid_core::{
    CredentialMetadata, HumanReadableId, IssuanceRecord, RecordId, SubjectId, WalletAddress,
};
use resid_ledger::{LedgerClient, OnChainTokenData};
use resid_store::{with_transaction, IssuanceStore, StoreTransaction};

use crate::deadline::Deadline;
use crate::error::IssuanceError;
use crate::observer::{IssuanceEvent, IssuanceObserver, ReconcileTrigger, TracingObserver};

/// Rebuilds local records from on-chain state.
#[derive(Clone)]
pub struct ReconciliationService {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn IssuanceStore>,
    observer: Arc<dyn IssuanceObserver>,
}

impl std::fmt::Debug for ReconciliationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationService")
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl ReconciliationService {
    /// Service over `ledger` and `store`, logging outcomes.
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<dyn IssuanceStore>) -> Self {
        Self {
            ledger,
            store,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the observer notified after standalone syncs.
    pub fn with_observer(mut self, observer: Arc<dyn IssuanceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Create the local record for `subject` from the token `wallet` holds.
    ///
    /// Runs in its own unit of work under the subject lock. `deadline`
    /// bounds the lock wait and both ledger reads.
    ///
    /// # Errors
    ///
    /// - [`IssuanceError::AlreadyReconciled`] if the subject has a record.
    /// - [`IssuanceError::NoTokenOnLedger`] if the wallet holds no token.
    /// - [`IssuanceError::WalletBoundToOtherSubject`] if another subject's
    ///   record holds the wallet.
    /// - [`IssuanceError::LedgerTimeout`] if `deadline` passes first.
    /// - Ledger and store failures.
    pub async fn sync_from_ledger(
        &self,
        subject: &SubjectId,
        wallet: &WalletAddress,
        deadline: Deadline,
    ) -> Result<IssuanceRecord, IssuanceError> {
        let service = self.clone();
        let owned_subject = subject.clone();
        let owned_wallet = wallet.clone();
        let record = with_transaction(&*self.store, move |tx| {
            Box::pin(async move {
                deadline.bound(tx.lock_subject(&owned_subject)).await?;
                service
                    .reconcile_within(tx, &owned_subject, &owned_wallet, deadline)
                    .await
            })
        })
        .await?;

        self.observer.notify(&IssuanceEvent::Reconciled {
            record: record.clone(),
            trigger: ReconcileTrigger::Standalone,
        });
        Ok(record)
    }

    /// Build and stage the record inside a caller's unit of work.
    ///
    /// The caller owns the transaction and decides whether to commit.
    /// Ledger reads give up with [`IssuanceError::LedgerTimeout`] at
    /// `deadline`.
    pub async fn reconcile_within(
        &self,
        tx: &mut dyn StoreTransaction,
        subject: &SubjectId,
        wallet: &WalletAddress,
        deadline: Deadline,
    ) -> Result<IssuanceRecord, IssuanceError> {
        if tx.find_by_subject(subject).await?.is_some() {
            return Err(IssuanceError::AlreadyReconciled(subject.to_string()));
        }

        let held = deadline.bound(self.ledger.has_token(wallet)).await?;
        let token_id = match held.token_id {
            Some(id) if held.exists => id,
            _ => return Err(IssuanceError::NoTokenOnLedger(wallet.to_string())),
        };
        let data = deadline
            .bound(self.ledger.read_token_data(&token_id, wallet))
            .await?;

        if let Some(existing) = tx.find_by_wallet(wallet).await? {
            if &existing.subject_id != subject {
                return Err(IssuanceError::WalletBoundToOtherSubject(wallet.to_string()));
            }
        }

        let now = Utc::now();
        let record = IssuanceRecord {
            id: RecordId::new(),
            subject_id: subject.clone(),
            wallet_address: wallet.clone(),
            token_id: Some(token_id),
            ledger_contract_address: self.ledger.contract_address().clone(),
            transaction_hash: String::new(),
            metadata: metadata_from_chain(data, now),
            block_number: 0,
            block_hash: String::new(),
            reconciled_from_ledger: true,
            created_at: now,
            updated_at: now,
        };

        tx.create(&record).await?;
        tx.link_profile(subject, wallet, &record.metadata.human_readable_id)
            .await?;
        tracing::debug!(subject = %subject, wallet = %wallet, "reconciled record staged");
        Ok(record)
    }
}

fn metadata_from_chain(data: OnChainTokenData, now: DateTime<Utc>) -> CredentialMetadata {
    let issued_at = i64::try_from(data.issued_at_epoch)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(|| {
            tracing::warn!(epoch = data.issued_at_epoch, "on-chain issuance time out of range");
            now
        });
    let human_readable_id = match HumanReadableId::new(data.human_readable_id.as_str()) {
        Ok(id) => id,
        Err(_) => {
            tracing::warn!("token carries no residency id, assigning a fresh one");
            HumanReadableId::generate(issued_at)
        }
    };
    let token_uri = (!data.token_uri.is_empty()).then_some(data.token_uri);
    CredentialMetadata {
        display_name: data.display_name,
        nationality_code: data.nationality_code,
        issued_at,
        human_readable_id,
        token_uri,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(epoch: u64, hrid: &str) -> OnChainTokenData {
        OnChainTokenData {
            display_name: "Ada".into(),
            nationality_code: "EE".into(),
            human_readable_id: hrid.into(),
            issued_at_epoch: epoch,
            token_uri: String::new(),
        }
    }

    #[test]
    fn metadata_uses_chain_time_and_id() {
        let m = metadata_from_chain(data(1_700_000_000, "ERES-1-ABCDEF"), Utc::now());
        assert_eq!(m.issued_at.timestamp(), 1_700_000_000);
        assert_eq!(m.human_readable_id.as_str(), "ERES-1-ABCDEF");
        assert!(m.token_uri.is_none());
    }

    #[test]
    fn out_of_range_time_falls_back_to_now() {
        let now = Utc::now();
        let m = metadata_from_chain(data(u64::MAX, "ERES-1-ABCDEF"), now);
        assert_eq!(m.issued_at, now);
    }

    #[test]
    fn blank_chain_id_is_replaced() {
        let m = metadata_from_chain(data(1_700_000_000, "  "), Utc::now());
        assert!(m.human_readable_id.is_generated_form());
    }
}
