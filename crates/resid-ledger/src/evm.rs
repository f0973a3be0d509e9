//! # EVM JSON-RPC Ledger Client
//!
//! Production [`LedgerClient`] that mints residency tokens on an
//! EVM-compatible chain via JSON-RPC.
//!
//! ## How It Works
//!
//! 1. `eth_estimateGas` runs the mint as a dry run. Contract reverts
//!    (wallet already credentialed, issuer unfunded) surface here with a
//!    readable reason before anything is broadcast.
//! 2. Under the nonce lock, the next nonce is taken from the local counter
//!    (seeded once from `eth_getTransactionCount(from, "pending")`) and the
//!    call is sent with `eth_sendTransaction`. The JSON-RPC endpoint signs;
//!    this client never holds a private key.
//! 3. `eth_getTransactionReceipt` is polled until the transaction is mined,
//!    then `eth_blockNumber` until the configured confirmation depth.
//! 4. The token id is read from the receipt's `ResidencyMinted` log. A
//!    mined mint with unparseable logs still yields a synthesized id.
//!
//! Reads (`hasResidencyToken`, `residencyData`, `tokenURI`, `ownerOf`) use
//! `eth_call` against the latest block and retry transport failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use alloy_primitives::{hex, Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use resid_core::{TokenId, WalletAddress};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::EvmLedgerConfig;
use crate::contract::{
    fallback_token_id, hasResidencyTokenCall, mintResidencyCall, ownerOfCall, residencyDataCall,
    token_id_from_logs, tokenURICall, u256_to_token_id,
};
use crate::error::LedgerError;
use crate::retry::READ_RETRY;
use crate::{LedgerClient, MintReceipt, MintRequest, OnChainTokenData, TokenIdSource, TokenProbe};

/// Gas estimate headroom, in percent.
const GAS_HEADROOM_PERCENT: u64 = 20;

/// Failure of a single JSON-RPC round trip, before call-site classification.
#[derive(Debug)]
enum RpcFailure {
    /// Network, HTTP status, or body decoding failure.
    Transport(String),
    /// The node answered with a JSON-RPC `error` object.
    Node(String),
}

/// EVM JSON-RPC implementation of [`LedgerClient`].
///
/// One instance owns the issuer account's nonce sequence. Share it behind
/// an `Arc`; constructing two clients for the same `from` address in one
/// process defeats nonce serialization.
#[derive(Debug)]
pub struct EvmLedgerClient {
    client: reqwest::Client,
    config: EvmLedgerConfig,
    contract: Address,
    from: Address,
    /// Next nonce to use; `None` until seeded or after a failed send.
    nonce: Mutex<Option<u64>>,
    request_id: AtomicU64,
}

impl EvmLedgerClient {
    /// Create a client from configuration.
    pub fn new(config: EvmLedgerConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build HTTP client: {e}")))?;

        let contract = parse_address(&config.contract_address)?;
        let from = parse_address(&config.from_address)?;

        Ok(Self {
            client,
            config,
            contract,
            from,
            nonce: Mutex::new(None),
            request_id: AtomicU64::new(1),
        })
    }

    /// Access the configuration.
    pub fn config(&self) -> &EvmLedgerConfig {
        &self.config
    }

    /// Send a JSON-RPC request and return the `result` field.
    ///
    /// `idempotent` requests retry on transport failure.
    async fn rpc_call(
        &self,
        method: &str,
        params: Value,
        idempotent: bool,
    ) -> Result<Value, RpcFailure> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
        });

        let send = || {
            let mut request = self.client.post(self.config.rpc_url.clone()).json(&body);
            if let Some(token) = &self.config.rpc_token {
                request = request.bearer_auth(token.expose());
            }
            request.send()
        };
        let sent = if idempotent {
            READ_RETRY.send(method, send).await
        } else {
            send().await
        };

        let resp = sent.map_err(|e| {
            if e.is_timeout() {
                RpcFailure::Transport(format!("{}: {method} timed out", self.config.chain_name))
            } else {
                RpcFailure::Transport(format!("{}: {method}: {e}", self.config.chain_name))
            }
        })?;

        if !resp.status().is_success() {
            return Err(RpcFailure::Transport(format!(
                "{}: {method}: HTTP {}",
                self.config.chain_name,
                resp.status()
            )));
        }

        let json: Value = resp.json().await.map_err(|e| {
            RpcFailure::Transport(format!(
                "{}: {method}: invalid JSON response: {e}",
                self.config.chain_name
            ))
        })?;

        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error");
            let data = error.get("data").and_then(Value::as_str);
            return Err(RpcFailure::Node(match data {
                Some(d) if !message.contains(d) => format!("{message} ({d})"),
                _ => message.to_string(),
            }));
        }

        json.get("result").cloned().ok_or_else(|| {
            RpcFailure::Transport(format!(
                "{}: {method}: JSON-RPC response missing 'result' field",
                self.config.chain_name
            ))
        })
    }

    /// `eth_call` a view function and return the raw return data.
    async fn call_view(&self, calldata: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
        let params = json!([
            { "to": self.config.contract_address.as_str(), "data": hex::encode_prefixed(calldata) },
            "latest"
        ]);
        let result = self
            .rpc_call("eth_call", params, true)
            .await
            .map_err(|failure| match failure {
                RpcFailure::Transport(msg) => LedgerError::Unavailable(msg),
                RpcFailure::Node(msg) => LedgerError::Rejected {
                    reason: msg,
                    transaction_hash: None,
                },
            })?;
        let encoded = result
            .as_str()
            .ok_or_else(|| LedgerError::MalformedResponse("eth_call result is not a string".into()))?;
        hex::decode(encoded)
            .map_err(|e| LedgerError::MalformedResponse(format!("eth_call result is not hex: {e}")))
    }

    /// Dry-run the mint to surface revert reasons and size the gas limit.
    async fn estimate_gas(&self, wallet: &WalletAddress, data: &str) -> Result<u64, LedgerError> {
        let params = json!([{
            "from": self.config.from_address.as_str(),
            "to": self.config.contract_address.as_str(),
            "data": data,
        }]);
        let result = self
            .rpc_call("eth_estimateGas", params, true)
            .await
            .map_err(|f| self.classify_write_failure(f, wallet, None))?;
        let estimate = parse_quantity(&result, "eth_estimateGas")?;
        Ok(gas_with_headroom(estimate))
    }

    /// Assign a nonce and broadcast, serialized across concurrent mints.
    async fn send_serialized(
        &self,
        wallet: &WalletAddress,
        data: &str,
        gas: u64,
    ) -> Result<String, LedgerError> {
        let mut next_nonce = self.nonce.lock().await;
        let nonce = match *next_nonce {
            Some(n) => n,
            None => {
                let params = json!([self.config.from_address.as_str(), "pending"]);
                let count = self
                    .rpc_call("eth_getTransactionCount", params, true)
                    .await
                    .map_err(|f| self.classify_write_failure(f, wallet, None))?;
                parse_quantity(&count, "eth_getTransactionCount")?
            }
        };

        let params = json!([{
            "from": self.config.from_address.as_str(),
            "to": self.config.contract_address.as_str(),
            "data": data,
            "gas": format!("0x{gas:x}"),
            "nonce": format!("0x{nonce:x}"),
            "chainId": format!("0x{:x}", self.config.chain_id),
        }]);

        match self.rpc_call("eth_sendTransaction", params, false).await {
            Ok(hash) => {
                *next_nonce = Some(nonce + 1);
                hash.as_str().map(str::to_string).ok_or_else(|| {
                    LedgerError::MalformedResponse("eth_sendTransaction result is not a string".into())
                })
            }
            Err(failure) => {
                // The node's view of the nonce is authoritative after a failed send.
                *next_nonce = None;
                Err(self.classify_write_failure(failure, wallet, None))
            }
        }
    }

    /// Poll until the transaction has a receipt, bounded by `receipt_timeout`.
    async fn wait_for_receipt(&self, tx_hash: &str, started: Instant) -> Result<Value, LedgerError> {
        loop {
            let receipt = self
                .rpc_call("eth_getTransactionReceipt", json!([tx_hash]), true)
                .await
                .map_err(transport_or_rejected)?;
            if !receipt.is_null() {
                return Ok(receipt);
            }
            self.ensure_within_receipt_timeout(tx_hash, started)?;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Poll block height until `block_number` has the configured depth.
    async fn wait_for_confirmations(
        &self,
        tx_hash: &str,
        block_number: u64,
        started: Instant,
    ) -> Result<(), LedgerError> {
        if self.config.confirmations <= 1 {
            return Ok(());
        }
        loop {
            let head = self
                .rpc_call("eth_blockNumber", json!([]), true)
                .await
                .map_err(transport_or_rejected)?;
            let head = parse_quantity(&head, "eth_blockNumber")?;
            let depth = head.saturating_sub(block_number) + 1;
            if depth >= self.config.confirmations {
                return Ok(());
            }
            tracing::debug!(
                tx_hash,
                depth,
                required = self.config.confirmations,
                "waiting for confirmations"
            );
            self.ensure_within_receipt_timeout(tx_hash, started)?;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn ensure_within_receipt_timeout(&self, tx_hash: &str, started: Instant) -> Result<(), LedgerError> {
        if started.elapsed() >= self.config.receipt_timeout {
            return Err(LedgerError::Unavailable(format!(
                "{}: transaction {tx_hash} not confirmed within {:?}",
                self.config.chain_name, self.config.receipt_timeout
            )));
        }
        Ok(())
    }

    fn classify_write_failure(
        &self,
        failure: RpcFailure,
        wallet: &WalletAddress,
        tx_hash: Option<String>,
    ) -> LedgerError {
        match failure {
            RpcFailure::Transport(msg) => LedgerError::Unavailable(msg),
            RpcFailure::Node(msg) => {
                LedgerError::classify_node_message(&msg, wallet.as_str(), tx_hash)
            }
        }
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    fn contract_address(&self) -> &WalletAddress {
        &self.config.contract_address
    }

    async fn submit_mint(&self, request: &MintRequest) -> Result<MintReceipt, LedgerError> {
        let call = mintResidencyCall {
            to: parse_address(&request.wallet)?,
            name: request.display_name.clone(),
            nationality: request.nationality_code.clone(),
            residencyId: request.human_readable_id.as_str().to_string(),
            metadataUri: request.metadata_uri.clone(),
        };
        let data = hex::encode_prefixed(call.abi_encode());

        let gas = self.estimate_gas(&request.wallet, &data).await?;
        let tx_hash = self.send_serialized(&request.wallet, &data, gas).await?;
        tracing::info!(
            chain = %self.config.chain_name,
            tx_hash = %tx_hash,
            wallet = %request.wallet,
            residency_id = %request.human_readable_id,
            "residency mint submitted"
        );

        let started = Instant::now();
        let receipt = self.wait_for_receipt(&tx_hash, started).await?;

        let status = receipt.get("status").and_then(Value::as_str).unwrap_or("0x1");
        if status == "0x0" {
            // A revert after broadcast usually means another mint to the same
            // wallet landed first.
            let probe = self.has_token(&request.wallet).await?;
            if probe.exists {
                return Err(LedgerError::AlreadyIssuedOnLedger {
                    wallet: request.wallet.to_string(),
                });
            }
            return Err(LedgerError::Rejected {
                reason: "transaction reverted".into(),
                transaction_hash: Some(tx_hash),
            });
        }

        let block_number = parse_quantity(
            receipt.get("blockNumber").unwrap_or(&Value::Null),
            "receipt.blockNumber",
        )?;
        let block_hash = receipt
            .get("blockHash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tx_index = receipt
            .get("transactionIndex")
            .map(|v| parse_quantity(v, "receipt.transactionIndex"))
            .transpose()?
            .unwrap_or(0);

        self.wait_for_confirmations(&tx_hash, block_number, started).await?;

        let logs = receipt
            .get("logs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let (token_id, token_id_source) =
            match token_id_from_logs(logs, &self.config.contract_address) {
                Some(id) => (id, TokenIdSource::EventLog),
                None => {
                    let id = fallback_token_id(block_number, tx_index);
                    tracing::warn!(
                        tx_hash = %tx_hash,
                        block_number,
                        tx_index,
                        token_id = %id,
                        "no mint event in receipt logs, using synthesized token id"
                    );
                    (id, TokenIdSource::Fallback)
                }
            };

        tracing::info!(
            tx_hash = %tx_hash,
            block_number,
            token_id = %token_id,
            "residency mint confirmed"
        );

        Ok(MintReceipt {
            transaction_hash: tx_hash,
            block_number,
            block_hash,
            token_id,
            token_id_source,
        })
    }

    async fn has_token(&self, wallet: &WalletAddress) -> Result<TokenProbe, LedgerError> {
        let call = hasResidencyTokenCall {
            holder: parse_address(wallet)?,
        };
        let data = self.call_view(call.abi_encode()).await?;
        let decoded = hasResidencyTokenCall::abi_decode_returns(&data, true).map_err(|e| {
            LedgerError::MalformedResponse(format!("hasResidencyToken returned undecodable data: {e}"))
        })?;
        Ok(if decoded.exists {
            TokenProbe::found(u256_to_token_id(decoded.tokenId))
        } else {
            TokenProbe::absent()
        })
    }

    async fn read_token_data(
        &self,
        token_id: &TokenId,
        wallet: &WalletAddress,
    ) -> Result<OnChainTokenData, LedgerError> {
        let id: U256 = token_id
            .as_str()
            .parse()
            .map_err(|e| LedgerError::MalformedResponse(format!("token id {token_id}: {e}")))?;

        let owner_data = self.call_view(ownerOfCall { tokenId: id }.abi_encode()).await?;
        let owner = ownerOfCall::abi_decode_returns(&owner_data, true)
            .map_err(|e| LedgerError::MalformedResponse(format!("ownerOf: {e}")))?
            .owner;
        let owner = hex::encode_prefixed(owner.as_slice());
        if !owner.eq_ignore_ascii_case(wallet.as_str()) {
            return Err(LedgerError::TokenOwnerMismatch {
                token_id: token_id.to_string(),
                expected: wallet.to_string(),
                actual: owner,
            });
        }

        let attrs_data = self
            .call_view(residencyDataCall { tokenId: id }.abi_encode())
            .await?;
        let attrs = residencyDataCall::abi_decode_returns(&attrs_data, true)
            .map_err(|e| LedgerError::MalformedResponse(format!("residencyData: {e}")))?;

        let uri_data = self.call_view(tokenURICall { tokenId: id }.abi_encode()).await?;
        let token_uri = tokenURICall::abi_decode_returns(&uri_data, true)
            .map_err(|e| LedgerError::MalformedResponse(format!("tokenURI: {e}")))?
            .uri;

        Ok(OnChainTokenData {
            display_name: attrs.name,
            nationality_code: attrs.nationality,
            human_readable_id: attrs.residencyId,
            issued_at_epoch: u64::try_from(attrs.issuedAt).map_err(|_| {
                LedgerError::MalformedResponse("residencyData.issuedAt exceeds u64".into())
            })?,
            token_uri,
        })
    }
}

fn transport_or_rejected(failure: RpcFailure) -> LedgerError {
    match failure {
        RpcFailure::Transport(msg) => LedgerError::Unavailable(msg),
        RpcFailure::Node(msg) => LedgerError::Rejected {
            reason: msg,
            transaction_hash: None,
        },
    }
}

fn parse_address(wallet: &WalletAddress) -> Result<Address, LedgerError> {
    wallet
        .as_str()
        .parse::<Address>()
        .map_err(|e| LedgerError::Config(format!("address {wallet}: {e}")))
}

/// Pad a gas estimate by [`GAS_HEADROOM_PERCENT`], saturating at `u64::MAX`.
fn gas_with_headroom(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.saturating_mul(GAS_HEADROOM_PERCENT) / 100)
}

/// Parse a hex `QUANTITY` (e.g. `"0x1a"`) into a `u64`.
fn parse_quantity(value: &Value, field: &str) -> Result<u64, LedgerError> {
    let raw = value
        .as_str()
        .ok_or_else(|| LedgerError::MalformedResponse(format!("{field} is not a hex string")))?;
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::MalformedResponse(format!("{field} missing 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::MalformedResponse(format!("{field} {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quantity_accepts_hex() {
        assert_eq!(parse_quantity(&json!("0x10"), "f").unwrap(), 16);
        assert_eq!(parse_quantity(&json!("0x0"), "f").unwrap(), 0);
        assert_eq!(parse_quantity(&json!("0x"), "f").unwrap(), 0);
    }

    #[test]
    fn parse_quantity_rejects_garbage() {
        assert!(parse_quantity(&json!(16), "f").is_err());
        assert!(parse_quantity(&json!("16"), "f").is_err());
        assert!(parse_quantity(&json!("0xzz"), "f").is_err());
    }

    #[test]
    fn gas_headroom_pads_and_saturates() {
        assert_eq!(gas_with_headroom(100_000), 120_000);
        assert_eq!(gas_with_headroom(0), 0);
        assert_eq!(gas_with_headroom(u64::MAX), u64::MAX);
        let large = u64::MAX / 10;
        assert!(gas_with_headroom(large) > large);
    }

    #[test]
    fn new_accepts_valid_config() {
        let config = EvmLedgerConfig::new(
            url::Url::parse("https://rpc.example.org").unwrap(),
            WalletAddress::new("0x1111111111111111111111111111111111111111").unwrap(),
            WalletAddress::new("0x2222222222222222222222222222222222222222").unwrap(),
        );
        let client = EvmLedgerClient::new(config).unwrap();
        assert_eq!(
            client.contract_address().as_str(),
            "0x1111111111111111111111111111111111111111"
        );
    }

    #[test]
    fn transport_failures_are_unavailable() {
        let err = transport_or_rejected(RpcFailure::Transport("boom".into()));
        assert!(err.is_transient());
        let err = transport_or_rejected(RpcFailure::Node("reverted".into()));
        assert!(matches!(err, LedgerError::Rejected { .. }));
    }
}
