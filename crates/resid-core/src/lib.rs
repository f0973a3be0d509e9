#![deny(missing_docs)]

//! # resid-core: Foundational Types for the Residency Credential Stack
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies, only `serde`, `thiserror`, `chrono`, `uuid`, and
//! `rand_core` from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** A [`SubjectId`] cannot be
//!    passed where a [`WalletAddress`] is expected, and a [`WalletAddress`]
//!    is always in canonical lower-case form once constructed.
//!
//! 2. **Records are immutable snapshots.** An [`IssuanceRecord`] carries a
//!    frozen [`CredentialMetadata`] copy of the subject's attributes at
//!    issuance time. Later profile edits never reach it.
//!
//! 3. **[`ValidationError`] hierarchy.** Structured errors with `thiserror`.
//!    No `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod record;

pub use error::ValidationError;
pub use identity::{HumanReadableId, SubjectId, TokenId, WalletAddress};
pub use record::{
    normalize_nationality_code, CredentialMetadata, IssuanceRecord, RecordId, SubjectProfile,
    VerificationStatus,
};
