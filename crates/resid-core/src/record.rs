//! # Issuance Records and Subject Profiles
//!
//! [`IssuanceRecord`] is the durable local representation of a minted
//! residency credential. There is at most one per subject and its
//! `token_id` never changes once persisted; the type offers no mutators.
//!
//! [`SubjectProfile`] mirrors the attributes that the external profile and
//! identity-verification systems own. Issuance reads it for eligibility and
//! for the metadata snapshot, and writes back the wallet and credential
//! identifier once a credential exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::identity::{HumanReadableId, SubjectId, TokenId, WalletAddress};

/// Surrogate primary key of an issuance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new random record identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a record identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frozen snapshot of subject attributes embedded in a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    /// Display name at issuance time.
    pub display_name: String,
    /// Nationality code at issuance time.
    pub nationality_code: String,
    /// When the credential was issued.
    pub issued_at: DateTime<Utc>,
    /// Correlation identifier, also stored on-chain.
    pub human_readable_id: HumanReadableId,
    /// Token metadata URI, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
}

/// Durable local record of an issued credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRecord {
    /// Surrogate key.
    pub id: RecordId,
    /// The credential holder. Unique across records.
    pub subject_id: SubjectId,
    /// Destination wallet. Unique across records.
    pub wallet_address: WalletAddress,
    /// Ledger token identifier, `None` until known.
    pub token_id: Option<TokenId>,
    /// Contract that issued the token.
    pub ledger_contract_address: WalletAddress,
    /// Minting transaction hash; empty for reconciled records.
    pub transaction_hash: String,
    /// Subject attribute snapshot.
    pub metadata: CredentialMetadata,
    /// Block containing the mint; 0 when unknown.
    pub block_number: u64,
    /// Hash of that block; empty when unknown.
    pub block_hash: String,
    /// Whether the record was rebuilt from ledger state rather than a direct mint.
    pub reconciled_from_ledger: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl IssuanceRecord {
    /// Whether the record carries write provenance (transaction and block).
    ///
    /// Records rebuilt by reconciliation do not, since a read cannot recover
    /// which transaction originally minted the token.
    pub fn has_write_provenance(&self) -> bool {
        !self.transaction_hash.is_empty() && self.block_number > 0
    }
}

/// Identity-verification state of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// No verification submitted.
    NotSubmitted,
    /// Submitted, awaiting review.
    Pending,
    /// Verification approved; the subject may be credentialed.
    Approved,
    /// Verification rejected.
    Rejected,
}

impl VerificationStatus {
    /// Stable lower-case string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "not_submitted",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_submitted" => Ok(Self::NotSubmitted),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ValidationError::UnknownVerificationStatus(other.to_string())),
        }
    }
}

/// Mirror of a subject's profile as owned by the external profile system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectProfile {
    /// Subject identity.
    pub subject_id: SubjectId,
    /// Name shown on the credential.
    pub display_name: String,
    /// Upper-case 2 or 3 letter nationality code.
    pub nationality_code: String,
    /// Identity-verification state.
    pub verification_status: VerificationStatus,
    /// Wallet written back after issuance.
    pub wallet_address: Option<WalletAddress>,
    /// Credential identifier written back after issuance.
    pub credential_id: Option<HumanReadableId>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl SubjectProfile {
    /// Create a profile in the `NotSubmitted` state with no credential links.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidNationalityCode`] unless the code is
    /// two or three ASCII letters.
    pub fn new(
        subject_id: SubjectId,
        display_name: impl Into<String>,
        nationality_code: &str,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            subject_id,
            display_name: display_name.into(),
            nationality_code: normalize_nationality_code(nationality_code)?,
            verification_status: VerificationStatus::NotSubmitted,
            wallet_address: None,
            credential_id: None,
            updated_at: Utc::now(),
        })
    }

    /// Set the verification status, builder style.
    pub fn with_status(mut self, status: VerificationStatus) -> Self {
        self.verification_status = status;
        self
    }

    /// Whether identity verification has been approved.
    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Approved
    }
}

/// Validate and upper-case a nationality code.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidNationalityCode`] unless the code is
/// two or three ASCII letters.
pub fn normalize_nationality_code(code: &str) -> Result<String, ValidationError> {
    let trimmed = code.trim();
    if !(2..=3).contains(&trimmed.len()) || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidNationalityCode(code.to_string()));
    }
    Ok(trimmed.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> IssuanceRecord {
        let now = Utc::now();
        IssuanceRecord {
            id: RecordId::new(),
            subject_id: SubjectId::new("S1").unwrap(),
            wallet_address: WalletAddress::new("0xabcdef0123456789abcdef0123456789abcdef12")
                .unwrap(),
            token_id: Some(TokenId::from(7u64)),
            ledger_contract_address: WalletAddress::new(
                "0x1111111111111111111111111111111111111111",
            )
            .unwrap(),
            transaction_hash: "0xfeed".into(),
            metadata: CredentialMetadata {
                display_name: "Ada Lovelace".into(),
                nationality_code: "GBR".into(),
                issued_at: now,
                human_readable_id: HumanReadableId::generate(now),
                token_uri: None,
            },
            block_number: 12,
            block_hash: "0xbeef".into(),
            reconciled_from_ledger: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn record_serializes_with_snake_case_fields() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(json["token_id"], "7");
        assert_eq!(json["reconciled_from_ledger"], false);
        assert!(json["metadata"].get("token_uri").is_none());
    }

    #[test]
    fn provenance_requires_hash_and_block() {
        let mut record = sample_record();
        assert!(record.has_write_provenance());
        record.transaction_hash.clear();
        record.block_number = 0;
        assert!(!record.has_write_provenance());
    }

    #[test]
    fn verification_status_roundtrips_through_str() {
        for status in [
            VerificationStatus::NotSubmitted,
            VerificationStatus::Pending,
            VerificationStatus::Approved,
            VerificationStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<VerificationStatus>().unwrap(), status);
        }
        assert!("done".parse::<VerificationStatus>().is_err());
    }

    #[test]
    fn profile_normalizes_nationality() {
        let profile = SubjectProfile::new(SubjectId::new("S1").unwrap(), "Ada", " ee ").unwrap();
        assert_eq!(profile.nationality_code, "EE");
        assert!(!profile.is_verified());
        assert!(profile.with_status(VerificationStatus::Approved).is_verified());
    }

    #[test]
    fn profile_rejects_bad_nationality() {
        assert!(SubjectProfile::new(SubjectId::new("S1").unwrap(), "Ada", "E").is_err());
        assert!(SubjectProfile::new(SubjectId::new("S1").unwrap(), "Ada", "EST1").is_err());
    }
}
