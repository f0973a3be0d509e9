//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps issuance, store and validation errors to HTTP status codes and a
//! JSON body carrying the stable error code. Messages of server-side
//! failures are logged but never returned to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use resid_issuance::{ErrorKind, IssuanceError};
use resid_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_VERIFIED", "LEDGER_TIMEOUT").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional context, such as the nested reconciliation failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request body or path failed validation (400).
    #[error("invalid input: {0}")]
    Validation(String),

    /// Missing or invalid credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),

    /// Service dependency not configured (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Issuance or reconciliation failure, mapped by its [`ErrorKind`].
    #[error(transparent)]
    Issuance(#[from] IssuanceError),
}

fn issuance_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput
        | ErrorKind::AlreadyIssued
        | ErrorKind::DuplicateSubject
        | ErrorKind::AlreadyReconciled => StatusCode::BAD_REQUEST,
        ErrorKind::NotVerified => StatusCode::FORBIDDEN,
        ErrorKind::NoTokenOnLedger => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyIssuedOnLedger | ErrorKind::WalletBoundToOtherSubject => {
            StatusCode::CONFLICT
        }
        ErrorKind::LedgerUnavailable
        | ErrorKind::LedgerTimeout
        | ErrorKind::InsufficientFunds => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::LedgerRejected => StatusCode::BAD_GATEWAY,
        ErrorKind::StorePersistFailure | ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    pub(crate) fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Issuance(e) => (issuance_status(e.kind()), e.kind().as_str()),
        }
    }

    /// Construct a service unavailable error (503).
    pub fn service_unavailable(msg: &str) -> Self {
        Self::ServiceUnavailable(msg.to_string())
    }

    /// Client-facing message. Server-side failures get a fixed text.
    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::Issuance(e) => match e.kind() {
                ErrorKind::Store => "An internal error occurred".to_string(),
                ErrorKind::LedgerUnavailable => "The ledger is currently unavailable".to_string(),
                ErrorKind::InsufficientFunds => {
                    "The issuer account cannot currently pay for issuance".to_string()
                }
                ErrorKind::LedgerRejected => "The ledger rejected the request".to_string(),
                _ => e.to_string(),
            },
            other => other.to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        let Self::Issuance(e) = self else {
            return None;
        };
        match e {
            IssuanceError::AlreadyIssuedOnLedger {
                wallet,
                reconciliation,
            } => Some(serde_json::json!({
                "wallet_address": wallet,
                "reconciliation_error": {
                    "code": reconciliation.kind().as_str(),
                    "message": AppError::Issuance((**reconciliation).clone()).public_message(),
                },
            })),
            IssuanceError::StorePersistFailure {
                transaction_hash,
                token_id,
                ..
            } => Some(serde_json::json!({
                "transaction_hash": transaction_hash,
                "token_id": token_id,
            })),
            other if other.is_retryable() => Some(serde_json::json!({ "retryable": true })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            match status {
                StatusCode::SERVICE_UNAVAILABLE => {
                    tracing::warn!(error = %self, code, "service unavailable")
                }
                _ => tracing::error!(error = ?self, code, "server error"),
            }
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.public_message(),
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Convert core validation errors to API errors.
impl From<resid_core::ValidationError> for AppError {
    fn from(err: resid_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Convert store errors raised outside the issuance workflow.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProfileNotFound(subject) => {
                Self::NotFound(format!("no profile for subject {subject}"))
            }
            StoreError::DuplicateSubject(_) | StoreError::DuplicateWallet(_) => {
                Self::Conflict(err.to_string())
            }
            StoreError::Database(_) | StoreError::Corrupt(_) => Self::Internal(err.to_string()),
        }
    }
}
