//! # Residency Token Contract Interface
//!
//! ABI bindings for the residency token contract, plus helpers that pull
//! the minted token identifier out of a transaction receipt.
//!
//! The contract is an ERC-721 variant that refuses transfers and allows at
//! most one token per holder. Only the methods below are relied on.

use alloy_primitives::{hex, U256};
use alloy_sol_types::{sol, SolEvent};
use resid_core::{TokenId, WalletAddress};
use serde_json::Value;

sol! {
    function mintResidency(address to, string name, string nationality, string residencyId, string metadataUri) external returns (uint256 tokenId);
    function hasResidencyToken(address holder) external view returns (bool exists, uint256 tokenId);
    function residencyData(uint256 tokenId) external view returns (string name, string nationality, string residencyId, uint256 issuedAt);
    function tokenURI(uint256 tokenId) external view returns (string uri);
    function ownerOf(uint256 tokenId) external view returns (address owner);

    event ResidencyMinted(address indexed to, uint256 indexed tokenId, string residencyId);
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
}

/// Token id multiplier used by [`fallback_token_id`].
pub const FALLBACK_BLOCK_MULTIPLIER: u128 = 1_000_000;

/// Extract the minted token identifier from receipt logs.
///
/// Only logs emitted by `contract` are considered. A `ResidencyMinted`
/// event is preferred; an ERC-721 `Transfer` from the zero address is
/// accepted otherwise.
pub fn token_id_from_logs(logs: &[Value], contract: &WalletAddress) -> Option<TokenId> {
    let minted_topic = hex::encode_prefixed(ResidencyMinted::SIGNATURE_HASH);
    let transfer_topic = hex::encode_prefixed(Transfer::SIGNATURE_HASH);
    let zero_topic = format!("0x{}", "0".repeat(64));

    let from_contract: Vec<Vec<String>> = logs
        .iter()
        .filter(|log| {
            log.get("address")
                .and_then(Value::as_str)
                .map(|a| a.eq_ignore_ascii_case(contract.as_str()))
                .unwrap_or(false)
        })
        .map(|log| {
            log.get("topics")
                .and_then(Value::as_array)
                .map(|topics| {
                    topics
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_ascii_lowercase)
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect();

    let minted = from_contract
        .iter()
        .find(|topics| topics.len() >= 3 && topics[0] == minted_topic)
        .and_then(|topics| topic_to_token_id(&topics[2]));
    if minted.is_some() {
        return minted;
    }

    from_contract
        .iter()
        .find(|topics| topics.len() == 4 && topics[0] == transfer_topic && topics[1] == zero_topic)
        .and_then(|topics| topic_to_token_id(&topics[3]))
}

/// Synthesize a token identifier from the mint's chain position.
///
/// Used when the receipt proves the mint happened but no log could be
/// parsed: `block_number * 1_000_000 + transaction_index`.
pub fn fallback_token_id(block_number: u64, transaction_index: u64) -> TokenId {
    TokenId::from(u128::from(block_number) * FALLBACK_BLOCK_MULTIPLIER + u128::from(transaction_index))
}

/// Convert a `uint256` to a [`TokenId`].
pub fn u256_to_token_id(value: U256) -> TokenId {
    // U256 renders as decimal, which TokenId always accepts.
    TokenId::new(value.to_string()).unwrap_or_else(|_| TokenId::from(0u64))
}

fn topic_to_token_id(topic: &str) -> Option<TokenId> {
    topic.parse::<U256>().ok().map(u256_to_token_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONTRACT: &str = "0x1111111111111111111111111111111111111111";

    fn contract() -> WalletAddress {
        WalletAddress::new(CONTRACT).unwrap()
    }

    fn word(n: u64) -> String {
        format!("0x{n:064x}")
    }

    #[test]
    fn minted_event_is_preferred() {
        let logs = vec![
            json!({
                "address": CONTRACT,
                "topics": [hex::encode_prefixed(Transfer::SIGNATURE_HASH), word(0), word(5), word(99)],
            }),
            json!({
                "address": CONTRACT,
                "topics": [hex::encode_prefixed(ResidencyMinted::SIGNATURE_HASH), word(5), word(42)],
            }),
        ];
        assert_eq!(token_id_from_logs(&logs, &contract()), Some(TokenId::from(42u64)));
    }

    #[test]
    fn transfer_from_zero_is_accepted() {
        let logs = vec![json!({
            "address": CONTRACT.to_uppercase().replace("0X", "0x"),
            "topics": [hex::encode_prefixed(Transfer::SIGNATURE_HASH), word(0), word(5), word(0x1f)],
        })];
        assert_eq!(token_id_from_logs(&logs, &contract()), Some(TokenId::from(31u64)));
    }

    #[test]
    fn logs_from_other_contracts_are_ignored() {
        let logs = vec![json!({
            "address": "0x9999999999999999999999999999999999999999",
            "topics": [hex::encode_prefixed(ResidencyMinted::SIGNATURE_HASH), word(5), word(42)],
        })];
        assert_eq!(token_id_from_logs(&logs, &contract()), None);
    }

    #[test]
    fn transfer_between_holders_is_not_a_mint() {
        let logs = vec![json!({
            "address": CONTRACT,
            "topics": [hex::encode_prefixed(Transfer::SIGNATURE_HASH), word(3), word(5), word(8)],
        })];
        assert_eq!(token_id_from_logs(&logs, &contract()), None);
    }

    #[test]
    fn fallback_combines_block_and_index() {
        assert_eq!(fallback_token_id(16, 2).as_str(), "16000002");
        assert_eq!(fallback_token_id(0, 0).as_str(), "0");
        let big = fallback_token_id(u64::MAX, 7);
        assert_eq!(
            big.as_str(),
            (u128::from(u64::MAX) * 1_000_000 + 7).to_string()
        );
    }

    #[test]
    fn u256_conversion_is_decimal() {
        assert_eq!(u256_to_token_id(U256::from(1234u64)).as_str(), "1234");
        assert_eq!(u256_to_token_id(U256::MAX).as_str(), U256::MAX.to_string());
    }
}
