//! # Issuance Errors
//!
//! [`IssuanceError`] is what the coordinator, the eligibility gate and the
//! reconciliation service return. Each variant maps to a stable
//! [`ErrorKind`] whose string form is the machine-readable code callers
//! see on the wire.

use resid_ledger::LedgerError;
use resid_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Stable classification of an [`IssuanceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    NotVerified,
    AlreadyIssued,
    AlreadyIssuedOnLedger,
    DuplicateSubject,
    WalletBoundToOtherSubject,
    LedgerUnavailable,
    LedgerTimeout,
    InsufficientFunds,
    LedgerRejected,
    NoTokenOnLedger,
    AlreadyReconciled,
    StorePersistFailure,
    Store,
}

impl ErrorKind {
    /// SCREAMING_SNAKE_CASE code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::NotVerified => "NOT_VERIFIED",
            Self::AlreadyIssued => "ALREADY_ISSUED",
            Self::AlreadyIssuedOnLedger => "ALREADY_ISSUED_ON_LEDGER",
            Self::DuplicateSubject => "DUPLICATE_SUBJECT",
            Self::WalletBoundToOtherSubject => "WALLET_BOUND_TO_OTHER_SUBJECT",
            Self::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            Self::LedgerTimeout => "LEDGER_TIMEOUT",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::LedgerRejected => "LEDGER_REJECTED",
            Self::NoTokenOnLedger => "NO_TOKEN_ON_LEDGER",
            Self::AlreadyReconciled => "ALREADY_RECONCILED",
            Self::StorePersistFailure => "STORE_PERSIST_FAILURE",
            Self::Store => "STORE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an issuance or reconciliation operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IssuanceError {
    /// Missing or malformed subject id or wallet address.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The subject has no approved identity verification.
    #[error("subject {0} has not completed identity verification")]
    NotVerified(String),

    /// A local record already exists for the subject.
    #[error("subject {0} already holds a residency credential")]
    AlreadyIssued(String),

    /// The ledger refused the mint because the wallet already holds a
    /// token, and rebuilding the local record from the ledger failed too.
    #[error("wallet {wallet} already holds a token on the ledger; reconciliation failed: {reconciliation}")]
    AlreadyIssuedOnLedger {
        /// Wallet the mint targeted.
        wallet: String,
        /// Why reconciliation failed.
        reconciliation: Box<IssuanceError>,
    },

    /// The store's subject uniqueness constraint rejected the record.
    #[error("an issuance record already exists for subject {0}")]
    DuplicateSubject(String),

    /// Another subject's record already holds this wallet.
    #[error("wallet {0} is bound to another subject")]
    WalletBoundToOtherSubject(String),

    /// The ledger could not be reached.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The lock wait or a ledger call did not finish before the caller's deadline.
    #[error("deadline passed before the ledger answered")]
    LedgerTimeout,

    /// The issuer account cannot pay for the mint.
    #[error("issuer account has insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The ledger reverted the call or answered with unusable data.
    #[error("ledger rejected the request: {0}")]
    LedgerRejected(String),

    /// The wallet holds no residency token.
    #[error("wallet {0} holds no residency token on the ledger")]
    NoTokenOnLedger(String),

    /// A record already exists; there is nothing to reconcile.
    #[error("subject {0} already has a local record")]
    AlreadyReconciled(String),

    /// The mint succeeded on the ledger but the local record could not be
    /// stored. Resolved by the next mint or sync for the subject.
    #[error("credential minted in {transaction_hash} but the local record could not be stored")]
    StorePersistFailure {
        /// Minting transaction.
        transaction_hash: String,
        /// Token that exists on-chain without a local record.
        token_id: String,
        /// Store failure detail, for logs only.
        reason: String,
    },

    /// The store failed outside the persist step.
    #[error("record store error: {0}")]
    Store(String),
}

impl IssuanceError {
    /// Stable classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotVerified(_) => ErrorKind::NotVerified,
            Self::AlreadyIssued(_) => ErrorKind::AlreadyIssued,
            Self::AlreadyIssuedOnLedger { .. } => ErrorKind::AlreadyIssuedOnLedger,
            Self::DuplicateSubject(_) => ErrorKind::DuplicateSubject,
            Self::WalletBoundToOtherSubject(_) => ErrorKind::WalletBoundToOtherSubject,
            Self::LedgerUnavailable(_) => ErrorKind::LedgerUnavailable,
            Self::LedgerTimeout => ErrorKind::LedgerTimeout,
            Self::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            Self::LedgerRejected(_) => ErrorKind::LedgerRejected,
            Self::NoTokenOnLedger(_) => ErrorKind::NoTokenOnLedger,
            Self::AlreadyReconciled(_) => ErrorKind::AlreadyReconciled,
            Self::StorePersistFailure { .. } => ErrorKind::StorePersistFailure,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Whether repeating the same request later may succeed.
    ///
    /// Only ledger reachability failures qualify. Gate and uniqueness
    /// failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LedgerUnavailable(_) | Self::LedgerTimeout)
    }
}

impl From<LedgerError> for IssuanceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(msg) | LedgerError::Config(msg) => Self::LedgerUnavailable(msg),
            LedgerError::InsufficientFunds(msg) => Self::InsufficientFunds(msg),
            other @ (LedgerError::AlreadyIssuedOnLedger { .. }
            | LedgerError::Rejected { .. }
            | LedgerError::TokenOwnerMismatch { .. }
            | LedgerError::MalformedResponse(_)) => Self::LedgerRejected(other.to_string()),
        }
    }
}

impl From<StoreError> for IssuanceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateSubject(subject) => Self::DuplicateSubject(subject),
            StoreError::DuplicateWallet(wallet) => Self::WalletBoundToOtherSubject(wallet),
            StoreError::ProfileNotFound(subject) => Self::NotVerified(subject),
            other @ (StoreError::Database(_) | StoreError::Corrupt(_)) => Self::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_stable_codes() {
        assert_eq!(IssuanceError::InvalidInput("x".into()).kind().as_str(), "INVALID_INPUT");
        assert_eq!(IssuanceError::LedgerTimeout.kind().as_str(), "LEDGER_TIMEOUT");
        assert_eq!(
            IssuanceError::WalletBoundToOtherSubject("w".into()).kind().to_string(),
            "WALLET_BOUND_TO_OTHER_SUBJECT"
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::AlreadyReconciled).unwrap(),
            serde_json::json!("ALREADY_RECONCILED")
        );
    }

    #[test]
    fn only_ledger_reachability_is_retryable() {
        assert!(IssuanceError::LedgerUnavailable("down".into()).is_retryable());
        assert!(IssuanceError::LedgerTimeout.is_retryable());
        assert!(!IssuanceError::NotVerified("s".into()).is_retryable());
        assert!(!IssuanceError::AlreadyIssued("s".into()).is_retryable());
        assert!(!IssuanceError::InsufficientFunds("x".into()).is_retryable());
    }

    #[test]
    fn ledger_errors_map_to_kinds() {
        let e: IssuanceError = LedgerError::Unavailable("timeout".into()).into();
        assert_eq!(e.kind(), ErrorKind::LedgerUnavailable);
        let e: IssuanceError = LedgerError::InsufficientFunds("0 wei".into()).into();
        assert_eq!(e.kind(), ErrorKind::InsufficientFunds);
        let e: IssuanceError = LedgerError::MalformedResponse("short".into()).into();
        assert_eq!(e.kind(), ErrorKind::LedgerRejected);
    }

    #[test]
    fn store_errors_map_to_kinds() {
        let e: IssuanceError = StoreError::DuplicateSubject("s".into()).into();
        assert_eq!(e, IssuanceError::DuplicateSubject("s".into()));
        let e: IssuanceError = StoreError::DuplicateWallet("w".into()).into();
        assert_eq!(e.kind(), ErrorKind::WalletBoundToOtherSubject);
        let e: IssuanceError = StoreError::Database("down".into()).into();
        assert_eq!(e.kind(), ErrorKind::Store);
    }

    #[test]
    fn persist_failure_message_omits_store_detail() {
        let e = IssuanceError::StorePersistFailure {
            transaction_hash: "0xabc".into(),
            token_id: "7".into(),
            reason: "connection reset by peer".into(),
        };
        assert!(!e.to_string().contains("connection reset"));
    }

    #[test]
    fn composed_error_names_both_failures() {
        let e = IssuanceError::AlreadyIssuedOnLedger {
            wallet: "0xabc".into(),
            reconciliation: Box::new(IssuanceError::NoTokenOnLedger("0xabc".into())),
        };
        let msg = e.to_string();
        assert!(msg.contains("already holds a token"));
        assert!(msg.contains("holds no residency token"));
    }
}
