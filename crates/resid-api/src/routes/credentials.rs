//! # Credential Routes
//!
//! Mint, ledger sync, status lookup and eligibility for residency
//! credentials. Mint and sync need a configured ledger; status and
//! eligibility read only the record store.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use resid_core::{IssuanceRecord, SubjectId, WalletAddress};
use resid_issuance::{Deadline, IssuanceError, MintOutcome};
use resid_store::RecordStore;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::{AppState, MAX_LEDGER_DEADLINE};

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request to issue a credential.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MintCredentialRequest {
    /// Subject to credential.
    pub subject_id: String,
    /// Destination wallet, `0x` followed by 40 hex characters.
    pub wallet_address: String,
    /// Ledger-phase deadline in milliseconds. Defaults to the server setting.
    pub deadline_ms: Option<u64>,
}

impl Validate for MintCredentialRequest {
    fn validate(&self) -> Result<(), String> {
        validate_deadline(self.deadline_ms)
    }
}

fn validate_deadline(deadline_ms: Option<u64>) -> Result<(), String> {
    match deadline_ms {
        Some(0) => Err("deadline_ms must be greater than zero".into()),
        Some(ms) if Duration::from_millis(ms) > MAX_LEDGER_DEADLINE => Err(format!(
            "deadline_ms must not exceed {}",
            MAX_LEDGER_DEADLINE.as_millis()
        )),
        _ => Ok(()),
    }
}

/// Result of a mint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MintCredentialResponse {
    pub success: bool,
    /// Absent when the credential was recovered from the ledger.
    pub transaction_hash: Option<String>,
    pub token_id: Option<String>,
    pub human_readable_id: String,
    /// True when the record was rebuilt from an existing on-chain token.
    pub synced: bool,
    pub ledger_contract_address: String,
}

impl From<MintOutcome> for MintCredentialResponse {
    fn from(outcome: MintOutcome) -> Self {
        Self {
            success: true,
            transaction_hash: outcome.transaction_hash,
            token_id: outcome.token_id.map(|t| t.to_string()),
            human_readable_id: outcome.human_readable_id.to_string(),
            synced: outcome.synced,
            ledger_contract_address: outcome.ledger_contract_address.to_string(),
        }
    }
}

/// Request to rebuild a subject's record from the ledger.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SyncCredentialRequest {
    pub subject_id: String,
    pub wallet_address: String,
    /// Deadline for the ledger reads in milliseconds. Defaults to the
    /// server setting.
    pub deadline_ms: Option<u64>,
}

impl Validate for SyncCredentialRequest {
    fn validate(&self) -> Result<(), String> {
        if self.subject_id.trim().is_empty() {
            return Err("subject_id must not be empty".into());
        }
        if self.wallet_address.trim().is_empty() {
            return Err("wallet_address must not be empty".into());
        }
        validate_deadline(self.deadline_ms)
    }
}

/// Credential attributes frozen at issuance.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MetadataResponse {
    pub display_name: String,
    pub nationality_code: String,
    pub issued_at: String,
    pub human_readable_id: String,
    pub token_uri: Option<String>,
}

/// A stored issuance record.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CredentialRecordResponse {
    pub id: String,
    pub subject_id: String,
    pub wallet_address: String,
    pub token_id: Option<String>,
    pub ledger_contract_address: String,
    /// Empty for records rebuilt from the ledger.
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_hash: String,
    pub metadata: MetadataResponse,
    pub reconciled_from_ledger: bool,
    pub created_at: String,
}

impl From<&IssuanceRecord> for CredentialRecordResponse {
    fn from(r: &IssuanceRecord) -> Self {
        Self {
            id: r.id.as_uuid().to_string(),
            subject_id: r.subject_id.to_string(),
            wallet_address: r.wallet_address.to_string(),
            token_id: r.token_id.as_ref().map(|t| t.to_string()),
            ledger_contract_address: r.ledger_contract_address.to_string(),
            transaction_hash: r.transaction_hash.clone(),
            block_number: r.block_number,
            block_hash: r.block_hash.clone(),
            metadata: MetadataResponse {
                display_name: r.metadata.display_name.clone(),
                nationality_code: r.metadata.nationality_code.clone(),
                issued_at: r.metadata.issued_at.to_rfc3339(),
                human_readable_id: r.metadata.human_readable_id.to_string(),
                token_uri: r.metadata.token_uri.clone(),
            },
            reconciled_from_ledger: r.reconciled_from_ledger,
            created_at: r.created_at.to_rfc3339(),
        }
    }
}

/// Result of a sync.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncCredentialResponse {
    pub success: bool,
    pub record: CredentialRecordResponse,
}

/// Credential status for a subject.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CredentialStatusResponse {
    pub exists: bool,
    pub token_id: Option<String>,
    pub ledger_contract_address: String,
    pub transaction_hash: String,
    pub wallet_address: String,
    pub metadata: MetadataResponse,
    pub reconciled_from_ledger: bool,
}

/// Eligibility answer for a subject.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EligibilityResponse {
    pub eligible: bool,
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the credential router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/credentials/mint", post(mint_credential))
        .route("/v1/credentials/sync", post(sync_credential))
        .route("/v1/credentials/:subject_id", get(credential_status))
        .route(
            "/v1/credentials/:subject_id/eligibility",
            get(credential_eligibility),
        )
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request_deadline(state: &AppState, deadline_ms: Option<u64>) -> Deadline {
    let budget = deadline_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config.ledger_deadline);
    Deadline::after(budget)
}

fn issuance_failure(state: &AppState, err: IssuanceError) -> AppError {
    state.metrics.record_failure(err.kind().as_str());
    AppError::Issuance(err)
}

fn parse_subject(raw: &str) -> Result<SubjectId, AppError> {
    SubjectId::new(raw).map_err(|e| AppError::Validation(e.to_string()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/credentials/mint: Issue a residency credential.
#[utoipa::path(
    post,
    path = "/v1/credentials/mint",
    request_body = MintCredentialRequest,
    responses(
        (status = 200, description = "Credential issued or recovered from the ledger", body = MintCredentialResponse),
        (status = 400, description = "Invalid input or already issued", body = crate::error::ErrorBody),
        (status = 403, description = "Subject not verified", body = crate::error::ErrorBody),
        (status = 409, description = "Already issued on ledger and reconciliation failed", body = crate::error::ErrorBody),
        (status = 503, description = "Ledger unavailable, timed out, or not configured", body = crate::error::ErrorBody),
    ),
    tag = "credentials"
)]
pub async fn mint_credential(
    State(state): State<AppState>,
    body: Result<Json<MintCredentialRequest>, JsonRejection>,
) -> Result<Json<MintCredentialResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let coordinator = state.coordinator()?;
    let deadline = request_deadline(&state, req.deadline_ms);

    let outcome = coordinator
        .mint(&req.subject_id, &req.wallet_address, deadline)
        .await
        .map_err(|e| issuance_failure(&state, e))?;
    Ok(Json(outcome.into()))
}

/// POST /v1/credentials/sync: Rebuild the local record from the ledger.
#[utoipa::path(
    post,
    path = "/v1/credentials/sync",
    request_body = SyncCredentialRequest,
    responses(
        (status = 200, description = "Record rebuilt", body = SyncCredentialResponse),
        (status = 400, description = "Invalid input or already reconciled", body = crate::error::ErrorBody),
        (status = 404, description = "Wallet holds no token", body = crate::error::ErrorBody),
        (status = 409, description = "Wallet bound to another subject", body = crate::error::ErrorBody),
        (status = 503, description = "Ledger unavailable, timed out, or not configured", body = crate::error::ErrorBody),
    ),
    tag = "credentials"
)]
pub async fn sync_credential(
    State(state): State<AppState>,
    body: Result<Json<SyncCredentialRequest>, JsonRejection>,
) -> Result<Json<SyncCredentialResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let coordinator = state.coordinator()?;
    let subject = parse_subject(&req.subject_id)?;
    let wallet = WalletAddress::new(req.wallet_address.as_str())
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let deadline = request_deadline(&state, req.deadline_ms);

    let record = coordinator
        .reconciliation()
        .sync_from_ledger(&subject, &wallet, deadline)
        .await
        .map_err(|e| issuance_failure(&state, e))?;
    Ok(Json(SyncCredentialResponse {
        success: true,
        record: (&record).into(),
    }))
}

/// GET /v1/credentials/:subject_id: Credential status.
#[utoipa::path(
    get,
    path = "/v1/credentials/{subject_id}",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    responses(
        (status = 200, description = "Subject holds a credential", body = CredentialStatusResponse),
        (status = 404, description = "No credential recorded", body = crate::error::ErrorBody),
    ),
    tag = "credentials"
)]
pub async fn credential_status(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<Json<CredentialStatusResponse>, AppError> {
    let subject = parse_subject(&subject_id)?;
    let record = state
        .store
        .find_by_subject(&subject)
        .await
        .map_err(|e| AppError::Issuance(e.into()))?
        .ok_or_else(|| AppError::NotFound(format!("no credential for subject {subject}")))?;

    let full = CredentialRecordResponse::from(&record);
    Ok(Json(CredentialStatusResponse {
        exists: true,
        token_id: full.token_id,
        ledger_contract_address: full.ledger_contract_address,
        transaction_hash: full.transaction_hash,
        wallet_address: full.wallet_address,
        metadata: full.metadata,
        reconciled_from_ledger: full.reconciled_from_ledger,
    }))
}

/// GET /v1/credentials/:subject_id/eligibility: Whether a mint would pass the gate.
#[utoipa::path(
    get,
    path = "/v1/credentials/{subject_id}/eligibility",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    responses(
        (status = 200, description = "Eligibility decision", body = EligibilityResponse),
    ),
    tag = "credentials"
)]
pub async fn credential_eligibility(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<Json<EligibilityResponse>, AppError> {
    let subject = parse_subject(&subject_id)?;
    let eligibility = state.gate.check_eligible(&subject).await?;
    Ok(Json(EligibilityResponse {
        eligible: eligibility.eligible,
        reason: eligibility.reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint(deadline_ms: Option<u64>) -> MintCredentialRequest {
        MintCredentialRequest {
            subject_id: "s".into(),
            wallet_address: "0x".into(),
            deadline_ms,
        }
    }

    #[test]
    fn deadline_bounds() {
        assert!(mint(None).validate().is_ok());
        assert!(mint(Some(1)).validate().is_ok());
        assert!(mint(Some(0)).validate().is_err());
        assert!(mint(Some(10 * 60 * 1000 + 1)).validate().is_err());
    }

    #[test]
    fn sync_requires_both_fields() {
        let req = SyncCredentialRequest {
            subject_id: " ".into(),
            wallet_address: "0xabc".into(),
            deadline_ms: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn sync_deadline_bounds() {
        let sync = |deadline_ms| SyncCredentialRequest {
            subject_id: "s".into(),
            wallet_address: "0xabc".into(),
            deadline_ms,
        };
        assert!(sync(None).validate().is_ok());
        assert!(sync(Some(500)).validate().is_ok());
        assert!(sync(Some(0)).validate().is_err());
        assert!(sync(Some(10 * 60 * 1000 + 1)).validate().is_err());
    }
}
