//! # Subject Profile Routes
//!
//! The local mirror of the external profile system. The profile
//! collaborator upserts names and nationality here; the verification
//! reviewer records approval decisions with an explicit call. Approval
//! alone never issues a credential.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use resid_core::{SubjectId, SubjectProfile, VerificationStatus};
use resid_store::ProfileDirectory;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Profile fields owned by the profile system.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertProfileRequest {
    pub display_name: String,
    /// Two or three letter code, any case.
    pub nationality_code: String,
    /// `not_submitted`, `pending`, `approved` or `rejected`. Defaults to `not_submitted`.
    pub verification_status: Option<String>,
}

impl Validate for UpsertProfileRequest {
    fn validate(&self) -> Result<(), String> {
        if self.display_name.trim().is_empty() {
            return Err("display_name must not be empty".into());
        }
        Ok(())
    }
}

/// Verification decision.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VerificationRequest {
    /// `not_submitted`, `pending`, `approved` or `rejected`.
    pub status: String,
}

/// A subject profile.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub subject_id: String,
    pub display_name: String,
    pub nationality_code: String,
    pub verification_status: String,
    /// Written back after issuance.
    pub wallet_address: Option<String>,
    /// Written back after issuance.
    pub credential_id: Option<String>,
    pub updated_at: String,
}

impl From<SubjectProfile> for ProfileResponse {
    fn from(p: SubjectProfile) -> Self {
        Self {
            subject_id: p.subject_id.to_string(),
            display_name: p.display_name,
            nationality_code: p.nationality_code,
            verification_status: p.verification_status.as_str().to_string(),
            wallet_address: p.wallet_address.map(|w| w.to_string()),
            credential_id: p.credential_id.map(|c| c.to_string()),
            updated_at: p.updated_at.to_rfc3339(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the subject profile router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/subjects/:subject_id/profile",
            get(get_profile).put(upsert_profile),
        )
        .route(
            "/v1/subjects/:subject_id/verification",
            post(record_verification),
        )
}

fn parse_status(raw: &str) -> Result<VerificationStatus, AppError> {
    raw.trim().parse::<VerificationStatus>().map_err(AppError::from)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /v1/subjects/:subject_id/profile
#[utoipa::path(
    get,
    path = "/v1/subjects/{subject_id}/profile",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 404, description = "No profile", body = crate::error::ErrorBody),
    ),
    tag = "subjects"
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<Json<ProfileResponse>, AppError> {
    let subject = SubjectId::new(subject_id)?;
    let profile = state
        .store
        .profile(&subject)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no profile for subject {subject}")))?;
    Ok(Json(profile.into()))
}

/// PUT /v1/subjects/:subject_id/profile: Mirror the profile system's view.
#[utoipa::path(
    put,
    path = "/v1/subjects/{subject_id}/profile",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    request_body = UpsertProfileRequest,
    responses(
        (status = 200, description = "Profile stored", body = ProfileResponse),
        (status = 400, description = "Invalid input", body = crate::error::ErrorBody),
    ),
    tag = "subjects"
)]
pub async fn upsert_profile(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    body: Result<Json<UpsertProfileRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let subject = SubjectId::new(subject_id)?;
    let status = match req.verification_status.as_deref() {
        Some(raw) => parse_status(raw)?,
        None => VerificationStatus::NotSubmitted,
    };
    let profile = SubjectProfile::new(subject, req.display_name.trim(), &req.nationality_code)?
        .with_status(status);

    let stored = state.store.upsert_profile(&profile).await?;
    tracing::info!(
        subject = %stored.subject_id,
        status = %stored.verification_status,
        "subject profile upserted"
    );
    Ok(Json(stored.into()))
}

/// POST /v1/subjects/:subject_id/verification: Record a verification decision.
#[utoipa::path(
    post,
    path = "/v1/subjects/{subject_id}/verification",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    request_body = VerificationRequest,
    responses(
        (status = 200, description = "Decision recorded", body = ProfileResponse),
        (status = 400, description = "Unknown status", body = crate::error::ErrorBody),
        (status = 404, description = "No profile", body = crate::error::ErrorBody),
    ),
    tag = "subjects"
)]
pub async fn record_verification(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    body: Result<Json<VerificationRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, AppError> {
    let req = extract_json(body)?;
    let subject = SubjectId::new(subject_id)?;
    let status = parse_status(&req.status)?;

    let profile = state.store.set_verification_status(&subject, status).await?;
    tracing::info!(subject = %subject, status = %status, "verification decision recorded");
    Ok(Json(profile.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing() {
        assert_eq!(parse_status("approved").unwrap(), VerificationStatus::Approved);
        assert_eq!(parse_status(" pending ").unwrap(), VerificationStatus::Pending);
        assert!(matches!(parse_status("maybe"), Err(AppError::Validation(_))));
    }

    #[test]
    fn blank_name_rejected() {
        let req = UpsertProfileRequest {
            display_name: "  ".into(),
            nationality_code: "EE".into(),
            verification_status: None,
        };
        assert!(req.validate().is_err());
    }
}
