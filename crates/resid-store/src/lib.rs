//! # resid-store: Transactional Record Store
//!
//! Durable home of [`IssuanceRecord`]s (at most one per subject and one per
//! wallet) and of the [`SubjectProfile`] mirrors that issuance reads for
//! eligibility and writes back once a credential exists.
//!
//! ## Units of Work
//!
//! Every write happens inside a [`StoreTransaction`] obtained from
//! [`RecordStore::begin`]. Records are created and profiles linked in the
//! same transaction, so either both land or neither does. A transaction
//! dropped without [`StoreTransaction::commit`] rolls back.
//!
//! [`with_transaction`] wraps the begin/commit/rollback dance for callers
//! that express their unit of work as a closure.
//!
//! ## Backends
//!
//! | Type | Backing |
//! |------|---------|
//! | [`PgRecordStore`] | Postgres via sqlx, embedded migrations |
//! | [`MemoryRecordStore`] | Process memory; used when `DATABASE_URL` is unset and in tests |
//!
//! Records have no update or delete path. A persisted `token_id` can
//! therefore never change.

pub mod error;
pub mod memory;
pub mod postgres;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use resid_core::{
    HumanReadableId, IssuanceRecord, SubjectId, SubjectProfile, VerificationStatus, WalletAddress,
};

pub use error::StoreError;
pub use memory::MemoryRecordStore;
pub use postgres::{init_pool, PgRecordStore};

/// Boxed, sendable future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Committed reads plus the entry point for units of work.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Committed record for `subject`, if any.
    async fn find_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<IssuanceRecord>, StoreError>;

    /// Committed record for `wallet`, if any.
    async fn find_by_wallet(
        &self,
        wallet: &WalletAddress,
    ) -> Result<Option<IssuanceRecord>, StoreError>;
}

/// An open unit of work.
///
/// Reads see the transaction's own uncommitted writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Block other units of work on the same subject until this one ends.
    async fn lock_subject(&mut self, subject: &SubjectId) -> Result<(), StoreError>;

    /// Record for `subject`, including this transaction's writes.
    async fn find_by_subject(
        &mut self,
        subject: &SubjectId,
    ) -> Result<Option<IssuanceRecord>, StoreError>;

    /// Record for `wallet`, including this transaction's writes.
    async fn find_by_wallet(
        &mut self,
        wallet: &WalletAddress,
    ) -> Result<Option<IssuanceRecord>, StoreError>;

    /// Insert a record.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateSubject`] or [`StoreError::DuplicateWallet`]
    /// when a uniqueness constraint is violated. Backends may report the
    /// violation here or at commit.
    async fn create(&mut self, record: &IssuanceRecord) -> Result<(), StoreError>;

    /// Write the credential mirror fields onto the subject's profile.
    /// A subject without a profile is left as is.
    async fn link_profile(
        &mut self,
        subject: &SubjectId,
        wallet: &WalletAddress,
        credential_id: &HumanReadableId,
    ) -> Result<(), StoreError>;

    /// Make all writes durable.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard all writes.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Read and maintain the subject profile mirror.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Profile for `subject`, if any.
    async fn profile(&self, subject: &SubjectId) -> Result<Option<SubjectProfile>, StoreError>;

    /// Insert or update name, nationality and verification status.
    ///
    /// The credential mirror fields are owned by issuance and are kept as
    /// stored. Issuance records are never touched.
    async fn upsert_profile(&self, profile: &SubjectProfile) -> Result<SubjectProfile, StoreError>;

    /// Record a verification decision.
    ///
    /// # Errors
    ///
    /// [`StoreError::ProfileNotFound`] when the subject has no profile.
    async fn set_verification_status(
        &self,
        subject: &SubjectId,
        status: VerificationStatus,
    ) -> Result<SubjectProfile, StoreError>;
}

/// Everything issuance needs from storage.
pub trait IssuanceStore: RecordStore + ProfileDirectory {}

impl<T: RecordStore + ProfileDirectory> IssuanceStore for T {}

/// Run `f` inside a unit of work.
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`. The
/// closure receives the open transaction and must return a boxed future
/// that owns whatever else it needs:
///
/// ```ignore
/// let record = with_transaction(&*store, move |tx| Box::pin(async move {
///     tx.create(&record).await?;
///     Ok::<_, StoreError>(record)
/// })).await?;
/// ```
pub async fn with_transaction<S, T, E, F>(store: &S, f: F) -> Result<T, E>
where
    S: RecordStore + ?Sized,
    E: From<StoreError>,
    F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> BoxFuture<'t, Result<T, E>>,
{
    let mut tx = store.begin().await?;
    match f(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed after aborted unit of work");
            }
            Err(e)
        }
    }
}
