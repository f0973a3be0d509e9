//! # Mock Ledger
//!
//! In-process [`LedgerClient`] with the same one-token-per-wallet rule as
//! the real contract. Used by tests across the workspace and by the API
//! server when `RESID_LEDGER_MODE=mock`.
//!
//! Failure injection lets tests drive every error path of the issuance
//! coordinator without a node: queue errors with [`MockLedger::fail_next_mint`],
//! take the whole ledger offline with [`MockLedger::set_unavailable`], or
//! plant a token minted outside the system with [`MockLedger::preload_token`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use resid_core::{HumanReadableId, TokenId, WalletAddress};

use crate::error::LedgerError;
use crate::{LedgerClient, MintReceipt, MintRequest, OnChainTokenData, TokenIdSource, TokenProbe};

const DEFAULT_CONTRACT: &str = "0x00000000000000000000000000000000000e5e1d";

#[derive(Debug, Clone)]
struct MockToken {
    owner: WalletAddress,
    data: OnChainTokenData,
}

#[derive(Debug)]
struct Inner {
    contract: WalletAddress,
    by_wallet: DashMap<WalletAddress, u64>,
    tokens: DashMap<u64, MockToken>,
    next_token: AtomicU64,
    next_block: AtomicU64,
    failures: Mutex<VecDeque<LedgerError>>,
    unavailable: AtomicBool,
    mint_latency: Mutex<Duration>,
    mint_calls: AtomicU64,
    read_calls: AtomicU64,
}

/// In-memory ledger. Cloning shares state.
#[derive(Debug, Clone)]
pub struct MockLedger {
    inner: Arc<Inner>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// Empty ledger with the default contract address.
    pub fn new() -> Self {
        let contract = WalletAddress::new(DEFAULT_CONTRACT).unwrap_or_else(|_| WalletAddress::zero());
        Self::with_contract(contract)
    }

    /// Empty ledger reporting `contract` as its issuing contract.
    pub fn with_contract(contract: WalletAddress) -> Self {
        Self {
            inner: Arc::new(Inner {
                contract,
                by_wallet: DashMap::new(),
                tokens: DashMap::new(),
                next_token: AtomicU64::new(1),
                next_block: AtomicU64::new(100),
                failures: Mutex::new(VecDeque::new()),
                unavailable: AtomicBool::new(false),
                mint_latency: Mutex::new(Duration::ZERO),
                mint_calls: AtomicU64::new(0),
                read_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Delay every mint by `latency` before it takes effect.
    pub fn set_mint_latency(&self, latency: Duration) {
        *self.inner.mint_latency.lock() = latency;
    }

    /// Make the next mint fail with `error` instead of executing.
    pub fn fail_next_mint(&self, error: LedgerError) {
        self.inner.failures.lock().push_back(error);
    }

    /// Toggle a simulated node outage for every operation.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Plant a token as if it had been minted by an earlier, unrecorded call.
    pub fn preload_token(
        &self,
        wallet: &WalletAddress,
        display_name: &str,
        nationality_code: &str,
        human_readable_id: &HumanReadableId,
        issued_at_epoch: u64,
    ) -> TokenId {
        let id = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        self.inner.by_wallet.insert(wallet.clone(), id);
        self.inner.tokens.insert(
            id,
            MockToken {
                owner: wallet.clone(),
                data: OnChainTokenData {
                    display_name: display_name.to_string(),
                    nationality_code: nationality_code.to_string(),
                    human_readable_id: human_readable_id.to_string(),
                    issued_at_epoch,
                    token_uri: format!("mock://residency/{id}"),
                },
            },
        );
        TokenId::from(id)
    }

    /// Number of `submit_mint` calls received, including failed ones.
    pub fn mint_calls(&self) -> u64 {
        self.inner.mint_calls.load(Ordering::SeqCst)
    }

    /// Number of `has_token` and `read_token_data` calls received.
    pub fn read_calls(&self) -> u64 {
        self.inner.read_calls.load(Ordering::SeqCst)
    }

    /// Number of tokens in existence.
    pub fn token_count(&self) -> usize {
        self.inner.tokens.len()
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock ledger offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn contract_address(&self) -> &WalletAddress {
        &self.inner.contract
    }

    async fn submit_mint(&self, request: &MintRequest) -> Result<MintReceipt, LedgerError> {
        self.inner.mint_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.inner.mint_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_available()?;
        if let Some(err) = self.inner.failures.lock().pop_front() {
            return Err(err);
        }

        // The entry guard serializes mints per wallet like the contract does.
        let block_number = self.inner.next_block.fetch_add(1, Ordering::SeqCst);
        let token = match self.inner.by_wallet.entry(request.wallet.clone()) {
            Entry::Occupied(_) => {
                return Err(LedgerError::AlreadyIssuedOnLedger {
                    wallet: request.wallet.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                let id = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
                self.inner.tokens.insert(
                    id,
                    MockToken {
                        owner: request.wallet.clone(),
                        data: OnChainTokenData {
                            display_name: request.display_name.clone(),
                            nationality_code: request.nationality_code.clone(),
                            human_readable_id: request.human_readable_id.to_string(),
                            issued_at_epoch: unix_now(),
                            token_uri: request.metadata_uri.clone(),
                        },
                    },
                );
                slot.insert(id);
                id
            }
        };

        Ok(MintReceipt {
            transaction_hash: format!("0x{:064x}", (block_number << 32) | token),
            block_number,
            block_hash: format!("0x{block_number:064x}"),
            token_id: TokenId::from(token),
            token_id_source: TokenIdSource::EventLog,
        })
    }

    async fn has_token(&self, wallet: &WalletAddress) -> Result<TokenProbe, LedgerError> {
        self.inner.read_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(match self.inner.by_wallet.get(wallet) {
            Some(id) => TokenProbe::found(TokenId::from(*id)),
            None => TokenProbe::absent(),
        })
    }

    async fn read_token_data(
        &self,
        token_id: &TokenId,
        wallet: &WalletAddress,
    ) -> Result<OnChainTokenData, LedgerError> {
        self.inner.read_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let id: u64 = token_id.as_str().parse().map_err(|_| LedgerError::Rejected {
            reason: format!("nonexistent token {token_id}"),
            transaction_hash: None,
        })?;
        let token = self
            .inner
            .tokens
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| LedgerError::Rejected {
                reason: format!("nonexistent token {token_id}"),
                transaction_hash: None,
            })?;
        if &token.owner != wallet {
            return Err(LedgerError::TokenOwnerMismatch {
                token_id: token_id.to_string(),
                expected: wallet.to_string(),
                actual: token.owner.to_string(),
            });
        }
        Ok(token.data)
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::new(format!("0x{}", format!("{n:02x}").repeat(20))).unwrap()
    }

    fn request(w: &WalletAddress) -> MintRequest {
        MintRequest {
            wallet: w.clone(),
            display_name: "Ada".into(),
            nationality_code: "EE".into(),
            human_readable_id: HumanReadableId::new("ERES-1-ABCDEF").unwrap(),
            metadata_uri: "https://meta.example/ERES-1-ABCDEF".into(),
        }
    }

    #[tokio::test]
    async fn mint_then_probe_and_read() {
        let ledger = MockLedger::new();
        let w = wallet(1);
        let receipt = ledger.submit_mint(&request(&w)).await.unwrap();
        assert!(!receipt.transaction_hash.is_empty());

        let probe = ledger.has_token(&w).await.unwrap();
        assert_eq!(probe.token_id, Some(receipt.token_id.clone()));

        let data = ledger.read_token_data(&receipt.token_id, &w).await.unwrap();
        assert_eq!(data.human_readable_id, "ERES-1-ABCDEF");
        assert_eq!(data.token_uri, "https://meta.example/ERES-1-ABCDEF");
    }

    #[tokio::test]
    async fn second_mint_to_same_wallet_is_rejected() {
        let ledger = MockLedger::new();
        let w = wallet(2);
        ledger.submit_mint(&request(&w)).await.unwrap();
        let err = ledger.submit_mint(&request(&w)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyIssuedOnLedger { .. }));
        assert_eq!(ledger.token_count(), 1);
        assert_eq!(ledger.mint_calls(), 2);
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let ledger = MockLedger::new();
        ledger.fail_next_mint(LedgerError::InsufficientFunds("empty".into()));
        let w = wallet(3);
        assert!(matches!(
            ledger.submit_mint(&request(&w)).await,
            Err(LedgerError::InsufficientFunds(_))
        ));
        assert!(ledger.submit_mint(&request(&w)).await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_blocks_reads() {
        let ledger = MockLedger::new();
        ledger.set_unavailable(true);
        assert!(ledger.has_token(&wallet(4)).await.unwrap_err().is_transient());
        ledger.set_unavailable(false);
        assert!(!ledger.has_token(&wallet(4)).await.unwrap().exists);
    }

    #[tokio::test]
    async fn read_checks_owner() {
        let ledger = MockLedger::new();
        let owner = wallet(5);
        let id = ledger.preload_token(
            &owner,
            "Grace",
            "US",
            &HumanReadableId::new("ERES-9-000001").unwrap(),
            1_700_000_000,
        );
        let err = ledger.read_token_data(&id, &wallet(6)).await.unwrap_err();
        assert!(matches!(err, LedgerError::TokenOwnerMismatch { .. }));
        let data = ledger.read_token_data(&id, &owner).await.unwrap();
        assert_eq!(data.issued_at_epoch, 1_700_000_000);
    }
}
