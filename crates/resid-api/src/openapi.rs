//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into a single OpenAPI document
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Static bearer token. Set via AUTH_TOKEN env var."))
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI document for the residency credential API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Residency Credential API",
        version = "0.4.44",
        description = "Issues non-transferable digital-residency credentials on a smart-contract ledger and keeps the local issuance record consistent with it.\n\nAuthentication: Bearer token via `Authorization: Bearer <token>` header. All `/v1/*` endpoints require authentication when a token is configured. Health probes (`/health/*`) are unauthenticated.",
        license(name = "BUSL-1.1")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Credentials ─────────────────────────────────────────────────
        crate::routes::credentials::mint_credential,
        crate::routes::credentials::sync_credential,
        crate::routes::credentials::credential_status,
        crate::routes::credentials::credential_eligibility,
        // ── Subjects ────────────────────────────────────────────────────
        crate::routes::subjects::get_profile,
        crate::routes::subjects::upsert_profile,
        crate::routes::subjects::record_verification,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::credentials::MintCredentialRequest,
            crate::routes::credentials::MintCredentialResponse,
            crate::routes::credentials::SyncCredentialRequest,
            crate::routes::credentials::SyncCredentialResponse,
            crate::routes::credentials::CredentialRecordResponse,
            crate::routes::credentials::CredentialStatusResponse,
            crate::routes::credentials::MetadataResponse,
            crate::routes::credentials::EligibilityResponse,
            crate::routes::subjects::UpsertProfileRequest,
            crate::routes::subjects::VerificationRequest,
            crate::routes::subjects::ProfileResponse,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "credentials", description = "Residency credential issuance, ledger sync and status"),
        (name = "subjects", description = "Subject profile mirror and verification decisions"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI JSON document at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
