//! # Eligibility Gate
//!
//! A subject may be credentialed when its identity verification is
//! approved and it holds no credential yet. The gate only reads: it never
//! writes and never calls the ledger.

use std::sync::Arc;

use resid_core::{SubjectId, SubjectProfile};
use resid_store::IssuanceStore;
use serde::Serialize;

use crate::error::IssuanceError;

/// Outcome of [`EligibilityGate::check_eligible`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    /// Whether a mint may proceed.
    pub eligible: bool,
    /// Why not, when not eligible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Verification and uniqueness precondition for minting.
#[derive(Clone)]
pub struct EligibilityGate {
    store: Arc<dyn IssuanceStore>,
}

impl std::fmt::Debug for EligibilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EligibilityGate").finish_non_exhaustive()
    }
}

impl EligibilityGate {
    /// Gate reading from `store`.
    pub fn new(store: Arc<dyn IssuanceStore>) -> Self {
        Self { store }
    }

    /// Answer whether `subject` may be credentialed, with a reason if not.
    ///
    /// Store failures are errors, not a negative answer.
    pub async fn check_eligible(&self, subject: &SubjectId) -> Result<Eligibility, IssuanceError> {
        match self.require_eligible(subject).await {
            Ok(_) => Ok(Eligibility {
                eligible: true,
                reason: None,
            }),
            Err(e @ (IssuanceError::NotVerified(_) | IssuanceError::AlreadyIssued(_))) => {
                Ok(Eligibility {
                    eligible: false,
                    reason: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Return the subject's profile if it may be credentialed.
    ///
    /// # Errors
    ///
    /// [`IssuanceError::NotVerified`] when the subject has no profile or its
    /// verification is not approved; [`IssuanceError::AlreadyIssued`] when a
    /// record exists.
    pub async fn require_eligible(
        &self,
        subject: &SubjectId,
    ) -> Result<SubjectProfile, IssuanceError> {
        let profile = self
            .store
            .profile(subject)
            .await?
            .ok_or_else(|| IssuanceError::NotVerified(subject.to_string()))?;
        if !profile.is_verified() {
            return Err(IssuanceError::NotVerified(subject.to_string()));
        }
        if self.store.find_by_subject(subject).await?.is_some() {
            return Err(IssuanceError::AlreadyIssued(subject.to_string()));
        }
        Ok(profile)
    }
}
