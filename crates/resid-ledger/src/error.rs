//! Ledger client error types.

use thiserror::Error;

/// Errors from ledger operations.
///
/// [`LedgerError::AlreadyIssuedOnLedger`] is not a plain failure: callers
/// treat it as the signal to reconcile local state from the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Node unreachable, timed out, returned a non-2xx status, or sent an
    /// unparseable body. Safe to retry from the caller's side.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The signing account cannot cover the transaction cost.
    #[error("insufficient funds in signing account: {0}")]
    InsufficientFunds(String),

    /// The ledger refused to mint because the wallet already holds a token.
    #[error("wallet {wallet} already holds a residency token on the ledger")]
    AlreadyIssuedOnLedger {
        /// Wallet that already holds a token.
        wallet: String,
    },

    /// The ledger rejected or reverted the call for another reason.
    #[error("ledger rejected call: {reason}")]
    Rejected {
        /// Node-supplied reason, if any.
        reason: String,
        /// Hash of the mined-but-reverted transaction, if it got that far.
        transaction_hash: Option<String>,
    },

    /// The token exists but is owned by a different wallet than expected.
    #[error("token {token_id} is owned by {actual}, not {expected}")]
    TokenOwnerMismatch {
        /// Token looked up.
        token_id: String,
        /// Wallet the caller expected.
        expected: String,
        /// Wallet that owns the token on-chain.
        actual: String,
    },

    /// A response was well-formed JSON-RPC but its payload could not be decoded.
    #[error("malformed ledger response: {0}")]
    MalformedResponse(String),

    /// The client was constructed with invalid settings.
    #[error("ledger client configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether the failure is transient at the transport level.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Map a node error message to the most specific variant.
    ///
    /// Nodes surface contract revert strings inside the JSON-RPC error
    /// message (e.g. `execution reverted: already holds a residency token`),
    /// so classification is by substring.
    pub fn classify_node_message(
        message: &str,
        wallet: &str,
        transaction_hash: Option<String>,
    ) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("insufficient funds") {
            Self::InsufficientFunds(message.to_string())
        } else if lower.contains("already has")
            || lower.contains("already holds")
            || lower.contains("already minted")
            || lower.contains("already issued")
            || lower.contains("already owns")
        {
            Self::AlreadyIssuedOnLedger {
                wallet: wallet.to_string(),
            }
        } else {
            Self::Rejected {
                reason: message.to_string(),
                transaction_hash,
            }
        }
    }
}
