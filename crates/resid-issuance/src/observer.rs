//! # Issuance Observers
//!
//! Callbacks invoked after an issuance outcome is final. Observers run
//! synchronously on the request task after commit, so they must not block.
//! Anything slow belongs on a channel drained elsewhere.

use std::sync::Arc;

use parking_lot::Mutex;
use resid_core::{IssuanceRecord, SubjectId, TokenId, WalletAddress};

/// What caused a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    /// A mint found the wallet already credentialed on the ledger.
    MintRecovery,
    /// An explicit sync request.
    Standalone,
}

/// A final issuance outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceEvent {
    /// A fresh mint was recorded.
    Minted(IssuanceRecord),
    /// A record was rebuilt from the ledger.
    Reconciled {
        /// The committed record.
        record: IssuanceRecord,
        /// What caused it.
        trigger: ReconcileTrigger,
    },
    /// A token was minted but its record could not be stored.
    Diverged {
        /// Subject the mint was for.
        subject_id: SubjectId,
        /// Wallet holding the token.
        wallet_address: WalletAddress,
        /// Minting transaction.
        transaction_hash: String,
        /// Token on the ledger.
        token_id: TokenId,
    },
}

/// Receives [`IssuanceEvent`]s.
pub trait IssuanceObserver: Send + Sync {
    /// Handle one event.
    fn notify(&self, event: &IssuanceEvent);
}

/// Logs each event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl IssuanceObserver for TracingObserver {
    fn notify(&self, event: &IssuanceEvent) {
        match event {
            IssuanceEvent::Minted(record) => tracing::info!(
                subject = %record.subject_id,
                wallet = %record.wallet_address,
                tx_hash = %record.transaction_hash,
                residency_id = %record.metadata.human_readable_id,
                "residency credential issued"
            ),
            IssuanceEvent::Reconciled { record, trigger } => tracing::info!(
                subject = %record.subject_id,
                wallet = %record.wallet_address,
                residency_id = %record.metadata.human_readable_id,
                ?trigger,
                "residency credential reconciled from ledger"
            ),
            IssuanceEvent::Diverged {
                subject_id,
                wallet_address,
                transaction_hash,
                token_id,
            } => tracing::warn!(
                subject = %subject_id,
                wallet = %wallet_address,
                tx_hash = %transaction_hash,
                token_id = %token_id,
                "residency credential on ledger without local record"
            ),
        }
    }
}

/// Fans each event out to several observers in order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn IssuanceObserver>>,
}

impl ObserverSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer, builder style.
    pub fn with(mut self, observer: Arc<dyn IssuanceObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl IssuanceObserver for ObserverSet {
    fn notify(&self, event: &IssuanceEvent) {
        for observer in &self.observers {
            observer.notify(event);
        }
    }
}

/// Keeps every event it sees. Useful in tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<IssuanceEvent>>,
}

impl RecordingObserver {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events seen so far.
    pub fn events(&self) -> Vec<IssuanceEvent> {
        self.events.lock().clone()
    }
}

impl IssuanceObserver for RecordingObserver {
    fn notify(&self, event: &IssuanceEvent) {
        self.events.lock().push(event.clone());
    }
}
