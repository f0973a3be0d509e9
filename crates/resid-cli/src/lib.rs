//! # resid-cli: Operator CLI for Residency Credentials
//!
//! Provides the `resid` command-line interface for the work operators do
//! outside the HTTP API. Reads the same environment as `resid-api`
//! (`DATABASE_URL`, `RESID_LEDGER_*`).
//!
//! ## Subcommands
//!
//! - `resid reconcile`: rebuild a subject's local record from the ledger.
//! - `resid status`: print the local record for a subject.
//! - `resid probe`: ask the ledger whether a wallet holds a token.
//! - `resid check-address`: validate and normalize a wallet address.
//!
//! ```bash
//! resid -v reconcile --subject 7f3c9a --wallet 0x52908400098527886e0f7030069857d2e4169ee7
//! resid status --subject 7f3c9a --json
//! ```

pub mod context;
pub mod credential;
pub mod ledger;
