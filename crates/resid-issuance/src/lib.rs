//! # resid-issuance: Residency Credential Issuance
//!
//! The issuance-and-reconciliation core. It decides whether a subject may
//! be credentialed, mints on the ledger, records the result in the same
//! unit of work as the profile write-back, and repairs the local record
//! when the ledger already knows about a credential the store does not.
//!
//! ## Components
//!
//! | Type | Role |
//! |------|------|
//! | [`EligibilityGate`] | Verified and not yet credentialed |
//! | [`IssuanceCoordinator`] | Mint-and-persist workflow |
//! | [`ReconciliationService`] | Ledger → store repair |
//! | [`IssuanceObserver`] | Post-commit notifications |
//!
//! ## Crate Dependencies
//!
//! - **resid-core**: identifiers and the record model.
//! - **resid-ledger**: [`resid_ledger::LedgerClient`].
//! - **resid-store**: units of work and the profile directory.

pub mod coordinator;
pub mod deadline;
pub mod eligibility;
pub mod error;
pub mod observer;
pub mod reconciliation;
pub mod state;

pub use coordinator::{IssuanceCoordinator, MintOutcome, DEFAULT_METADATA_BASE_URI};
pub use deadline::{Deadline, DEFAULT_LEDGER_DEADLINE};
pub use eligibility::{Eligibility, EligibilityGate};
pub use error::{ErrorKind, IssuanceError};
pub use observer::{
    IssuanceEvent, IssuanceObserver, ObserverSet, ReconcileTrigger, RecordingObserver,
    TracingObserver,
};
pub use reconciliation::ReconciliationService;
pub use state::IssuanceState;
