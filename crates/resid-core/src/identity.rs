//! # Identity Newtypes
//!
//! Domain-primitive newtypes for the identifiers that flow through issuance
//! and reconciliation. All of them are string-backed and validate format at
//! construction time; deserialization goes through the same validation.
//!
//! - [`SubjectId`]: the eligible party, as known to the profile system.
//! - [`WalletAddress`]: EVM address, stored in lower-case canonical form.
//! - [`TokenId`]: ledger-assigned token identifier (decimal `uint256`).
//! - [`HumanReadableId`]: correlation string embedded in credential metadata.

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Prefix of every generated [`HumanReadableId`].
pub const HUMAN_READABLE_ID_PREFIX: &str = "ERES";

const MAX_ID_LEN: usize = 128;

// ---------------------------------------------------------------------------
// SubjectId
// ---------------------------------------------------------------------------

/// Identity of the party a credential is issued to.
///
/// # Validation
///
/// - 1 to 128 characters after trimming surrounding whitespace
/// - No interior whitespace or control characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a subject identifier, validating format.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidSubjectId`] for empty, oversized,
    /// or whitespace-containing input.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > MAX_ID_LEN
            || trimmed.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ValidationError::InvalidSubjectId(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Access the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// WalletAddress
// ---------------------------------------------------------------------------

/// EVM account address in canonical lower-case form.
///
/// Format: `0x` followed by exactly 40 hexadecimal digits. Mixed-case
/// (EIP-55 checksummed) input is accepted and lower-cased; the checksum is
/// not verified, since the ledger treats addresses case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse and normalize a wallet address.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidWalletAddress`] if the input is not
    /// `0x`/`0X` followed by 40 hex digits.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = value.into();
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ValidationError::InvalidWalletAddress(raw.clone()))?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidWalletAddress(raw));
        }
        Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }

    /// Check whether a string is a well-formed address without constructing one.
    pub fn is_valid(value: &str) -> bool {
        Self::new(value).is_ok()
    }

    /// Access the canonical `0x`-prefixed lower-case string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The all-zero address.
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for WalletAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WalletAddress> for String {
    fn from(addr: WalletAddress) -> Self {
        addr.0
    }
}

// ---------------------------------------------------------------------------
// TokenId
// ---------------------------------------------------------------------------

/// Ledger-assigned token identifier.
///
/// Stored as the decimal string form of a `uint256`, since values can exceed
/// every native integer width. Leading zeros are stripped on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenId(String);

impl TokenId {
    /// Create a token identifier from its decimal string form.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTokenId`] if the input is empty,
    /// longer than 78 digits (the width of `2^256`), or not all digits.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 78 || !trimmed.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ValidationError::InvalidTokenId(raw));
        }
        let stripped = trimmed.trim_start_matches('0');
        let canonical = if stripped.is_empty() { "0" } else { stripped };
        Ok(Self(canonical.to_string()))
    }

    /// Access the decimal string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for TokenId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<u128> for TokenId {
    fn from(value: u128) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TokenId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TokenId> for String {
    fn from(id: TokenId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// HumanReadableId
// ---------------------------------------------------------------------------

/// Correlation identifier embedded in credential metadata and on-chain.
///
/// Generated identifiers have the form `ERES-<epoch-millis>-<6 hex>`, where
/// the suffix comes from the operating system RNG. Identifiers read back
/// from the ledger are accepted as-is as long as they are non-empty, since
/// tokens minted by older tooling may use other formats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HumanReadableId(String);

impl HumanReadableId {
    /// Wrap an existing identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidHumanReadableId`] for empty or
    /// oversized input.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_ID_LEN {
            return Err(ValidationError::InvalidHumanReadableId(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Generate a fresh identifier stamped with `at`.
    pub fn generate(at: DateTime<Utc>) -> Self {
        let mut suffix = [0u8; 3];
        if OsRng.try_fill_bytes(&mut suffix).is_err() {
            // Entropy source unavailable; fall back to clock noise.
            let nanos = at.timestamp_subsec_nanos().to_be_bytes();
            suffix.copy_from_slice(&nanos[1..]);
        }
        Self(format!(
            "{HUMAN_READABLE_ID_PREFIX}-{}-{:02X}{:02X}{:02X}",
            at.timestamp_millis(),
            suffix[0],
            suffix[1],
            suffix[2]
        ))
    }

    /// Whether this identifier matches the generated `ERES-<millis>-<hex>` layout.
    pub fn is_generated_form(&self) -> bool {
        let mut parts = self.0.splitn(3, '-');
        matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(HUMAN_READABLE_ID_PREFIX), Some(millis), Some(suffix))
                if !millis.is_empty()
                    && millis.chars().all(|c| c.is_ascii_digit())
                    && suffix.len() == 6
                    && suffix.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        )
    }

    /// Access the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HumanReadableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for HumanReadableId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HumanReadableId> for String {
    fn from(id: HumanReadableId) -> Self {
        id.0
    }
}
