//! # Validation Errors
//!
//! Raised when a domain primitive is constructed from input that does not
//! satisfy its format rules. Every variant carries the offending value so
//! operators can see what was rejected.

use thiserror::Error;

/// Domain primitive validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Subject identifier is empty, too long, or contains whitespace.
    #[error("invalid subject id: \"{0}\" (expected 1-128 printable characters without whitespace)")]
    InvalidSubjectId(String),

    /// Wallet address is not `0x` followed by 40 hexadecimal digits.
    #[error("invalid wallet address: \"{0}\" (expected 0x followed by 40 hex digits)")]
    InvalidWalletAddress(String),

    /// Token identifier is not the decimal form of an unsigned integer.
    #[error("invalid token id: \"{0}\" (expected a non-negative decimal integer)")]
    InvalidTokenId(String),

    /// Human-readable credential identifier is empty or too long.
    #[error("invalid human-readable id: \"{0}\" (expected 1-128 characters)")]
    InvalidHumanReadableId(String),

    /// Nationality code is not a 2 or 3 letter alphabetic code.
    #[error("invalid nationality code: \"{0}\" (expected 2-3 letters)")]
    InvalidNationalityCode(String),

    /// Verification status string is not one of the known states.
    #[error("unknown verification status: \"{0}\"")]
    UnknownVerificationStatus(String),
}
