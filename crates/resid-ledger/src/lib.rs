//! # resid-ledger: Ledger Client for Residency Credentials
//!
//! Thin wrapper around the external smart-contract ledger that is the
//! source of truth for issued residency tokens. Depends only on the
//! identifier newtypes in `resid-core`.
//!
//! ## Implementations
//!
//! | Type | Use |
//! |------|-----|
//! | [`EvmLedgerClient`] | JSON-RPC against an EVM node; signing delegated to the endpoint |
//! | [`MockLedger`] | In-process ledger for tests and local development |
//!
//! ## Error Semantics
//!
//! [`LedgerError::AlreadyIssuedOnLedger`] is the one error that callers
//! do not surface directly: it means the wallet already holds a token and
//! local state should be rebuilt from the ledger.

pub mod config;
pub mod contract;
pub mod error;
pub mod evm;
pub mod mock;
mod retry;

use async_trait::async_trait;
use resid_core::{HumanReadableId, TokenId, WalletAddress};
use serde::{Deserialize, Serialize};

pub use config::{ConfigError, EvmLedgerConfig, LedgerMode, RpcToken};
pub use error::LedgerError;
pub use evm::EvmLedgerClient;
pub use mock::MockLedger;

/// Arguments of a mint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    /// Destination wallet.
    pub wallet: WalletAddress,
    /// Name stored on-chain.
    pub display_name: String,
    /// Nationality code stored on-chain.
    pub nationality_code: String,
    /// Correlation id stored on-chain.
    pub human_readable_id: HumanReadableId,
    /// Token metadata URI.
    pub metadata_uri: String,
}

/// Where a [`MintReceipt`]'s token id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenIdSource {
    /// Parsed from the contract's mint event.
    EventLog,
    /// Synthesized from block number and transaction index.
    Fallback,
}

/// Result of a confirmed mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    /// Minting transaction hash.
    pub transaction_hash: String,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Hash of that block.
    pub block_hash: String,
    /// Token assigned by the contract.
    pub token_id: TokenId,
    /// Provenance of `token_id`.
    pub token_id_source: TokenIdSource,
}

/// Answer to "does this wallet hold a token".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenProbe {
    /// Whether a token exists.
    pub exists: bool,
    /// The token, when one exists.
    pub token_id: Option<TokenId>,
}

impl TokenProbe {
    /// A wallet holding `token_id`.
    pub fn found(token_id: TokenId) -> Self {
        Self {
            exists: true,
            token_id: Some(token_id),
        }
    }

    /// A wallet with no token.
    pub fn absent() -> Self {
        Self {
            exists: false,
            token_id: None,
        }
    }
}

/// Per-token attributes stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainTokenData {
    /// Name recorded at mint time.
    pub display_name: String,
    /// Nationality code recorded at mint time.
    pub nationality_code: String,
    /// Correlation id recorded at mint time.
    pub human_readable_id: String,
    /// Mint time as Unix seconds.
    pub issued_at_epoch: u64,
    /// Metadata URI.
    pub token_uri: String,
}

/// Operations the issuance core needs from the ledger.
///
/// All methods await remote calls and impose no timeout of their own;
/// callers bound them with a deadline.
#[async_trait]
pub trait LedgerClient: Send + Sync + std::fmt::Debug {
    /// Contract that issues residency tokens.
    fn contract_address(&self) -> &WalletAddress;

    /// Submit a mint and wait until it is confirmed.
    async fn submit_mint(&self, request: &MintRequest) -> Result<MintReceipt, LedgerError>;

    /// Check whether `wallet` holds a token. "No token" is `Ok(absent)`.
    async fn has_token(&self, wallet: &WalletAddress) -> Result<TokenProbe, LedgerError>;

    /// Read the attributes stored for `token_id`, verifying `wallet` owns it.
    async fn read_token_data(
        &self,
        token_id: &TokenId,
        wallet: &WalletAddress,
    ) -> Result<OnChainTokenData, LedgerError>;
}
