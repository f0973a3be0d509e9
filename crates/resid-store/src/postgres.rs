//! # Postgres Record Store
//!
//! sqlx-backed implementation of [`RecordStore`] and [`ProfileDirectory`].
//!
//! Uniqueness of subject and wallet is enforced by the
//! `issuance_records_subject_unique` and `issuance_records_wallet_unique`
//! constraints; violations surface as [`StoreError::DuplicateSubject`] and
//! [`StoreError::DuplicateWallet`]. Per-subject serialization uses a
//! transaction-scoped advisory lock keyed on the subject id, released
//! automatically at commit or rollback.
//!
//! The credential metadata snapshot is stored as JSONB so that it is read
//! back exactly as written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resid_core::{
    CredentialMetadata, HumanReadableId, IssuanceRecord, RecordId, SubjectId, SubjectProfile,
    TokenId, VerificationStatus, WalletAddress,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::{ProfileDirectory, RecordStore, StoreTransaction};

const WALLET_UNIQUE: &str = "issuance_records_wallet_unique";

const RECORD_COLUMNS: &str = "id, subject_id, wallet_address, token_id, ledger_contract_address, \
     transaction_hash, metadata, block_number, block_hash, reconciled_from_ledger, created_at, updated_at";

const PROFILE_COLUMNS: &str = "subject_id, display_name, nationality_code, verification_status, \
     wallet_address, credential_id, updated_at";

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set, using the in-memory record store. \
                 Issuance records will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Postgres-backed record store and profile directory.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Wrap an initialized pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn find_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<IssuanceRecord>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM issuance_records WHERE subject_id = $1"
        ))
        .bind(subject.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(RecordRow::into_record).transpose()
    }

    async fn find_by_wallet(
        &self,
        wallet: &WalletAddress,
    ) -> Result<Option<IssuanceRecord>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM issuance_records WHERE wallet_address = $1"
        ))
        .bind(wallet.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(RecordRow::into_record).transpose()
    }
}

#[async_trait]
impl ProfileDirectory for PgRecordStore {
    async fn profile(&self, subject: &SubjectId) -> Result<Option<SubjectProfile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM subject_profiles WHERE subject_id = $1"
        ))
        .bind(subject.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ProfileRow::into_profile).transpose()
    }

    async fn upsert_profile(&self, profile: &SubjectProfile) -> Result<SubjectProfile, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "INSERT INTO subject_profiles (subject_id, display_name, nationality_code, verification_status, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (subject_id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                nationality_code = EXCLUDED.nationality_code,
                verification_status = EXCLUDED.verification_status,
                updated_at = EXCLUDED.updated_at
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(profile.subject_id.as_str())
        .bind(&profile.display_name)
        .bind(&profile.nationality_code)
        .bind(profile.verification_status.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        row.into_profile()
    }

    async fn set_verification_status(
        &self,
        subject: &SubjectId,
        status: VerificationStatus,
    ) -> Result<SubjectProfile, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "UPDATE subject_profiles SET verification_status = $1, updated_at = $2
             WHERE subject_id = $3 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(subject.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::ProfileNotFound(subject.to_string()))?
            .into_profile()
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_subject(&mut self, subject: &SubjectId) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(subject.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_by_subject(
        &mut self,
        subject: &SubjectId,
    ) -> Result<Option<IssuanceRecord>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM issuance_records WHERE subject_id = $1"
        ))
        .bind(subject.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(RecordRow::into_record).transpose()
    }

    async fn find_by_wallet(
        &mut self,
        wallet: &WalletAddress,
    ) -> Result<Option<IssuanceRecord>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM issuance_records WHERE wallet_address = $1"
        ))
        .bind(wallet.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(RecordRow::into_record).transpose()
    }

    async fn create(&mut self, record: &IssuanceRecord) -> Result<(), StoreError> {
        let metadata = serde_json::to_value(&record.metadata)
            .map_err(|e| StoreError::Corrupt(format!("failed to serialize credential metadata: {e}")))?;
        let block_number = i64::try_from(record.block_number)
            .map_err(|_| StoreError::Corrupt(format!("block number {} exceeds BIGINT", record.block_number)))?;

        sqlx::query(
            "INSERT INTO issuance_records (id, subject_id, wallet_address, token_id, ledger_contract_address,
                transaction_hash, metadata, block_number, block_hash, reconciled_from_ledger, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(*record.id.as_uuid())
        .bind(record.subject_id.as_str())
        .bind(record.wallet_address.as_str())
        .bind(record.token_id.as_ref().map(TokenId::as_str))
        .bind(record.ledger_contract_address.as_str())
        .bind(&record.transaction_hash)
        .bind(&metadata)
        .bind(block_number)
        .bind(&record.block_hash)
        .bind(record.reconciled_from_ledger)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_insert_error(e, record))?;

        Ok(())
    }

    async fn link_profile(
        &mut self,
        subject: &SubjectId,
        wallet: &WalletAddress,
        credential_id: &HumanReadableId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE subject_profiles SET wallet_address = $1, credential_id = $2, updated_at = $3
             WHERE subject_id = $4",
        )
        .bind(wallet.as_str())
        .bind(credential_id.as_str())
        .bind(Utc::now())
        .bind(subject.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn map_insert_error(e: sqlx::Error, record: &IssuanceRecord) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some(WALLET_UNIQUE) => StoreError::DuplicateWallet(record.wallet_address.to_string()),
                _ => StoreError::DuplicateSubject(record.subject_id.to_string()),
            };
        }
    }
    e.into()
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    subject_id: String,
    wallet_address: String,
    token_id: Option<String>,
    ledger_contract_address: String,
    transaction_hash: String,
    metadata: serde_json::Value,
    block_number: i64,
    block_hash: String,
    reconciled_from_ledger: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn into_record(self) -> Result<IssuanceRecord, StoreError> {
        let corrupt = |field: &str, e: &dyn std::fmt::Display| {
            StoreError::Corrupt(format!("issuance record {}: {field}: {e}", self.id))
        };
        let metadata: CredentialMetadata =
            serde_json::from_value(self.metadata.clone()).map_err(|e| corrupt("metadata", &e))?;
        Ok(IssuanceRecord {
            id: RecordId::from_uuid(self.id),
            subject_id: SubjectId::new(self.subject_id.clone())
                .map_err(|e| corrupt("subject_id", &e))?,
            wallet_address: WalletAddress::new(self.wallet_address.clone())
                .map_err(|e| corrupt("wallet_address", &e))?,
            token_id: self
                .token_id
                .clone()
                .map(TokenId::new)
                .transpose()
                .map_err(|e| corrupt("token_id", &e))?,
            ledger_contract_address: WalletAddress::new(self.ledger_contract_address.clone())
                .map_err(|e| corrupt("ledger_contract_address", &e))?,
            transaction_hash: self.transaction_hash.clone(),
            metadata,
            block_number: u64::try_from(self.block_number)
                .map_err(|e| corrupt("block_number", &e))?,
            block_hash: self.block_hash.clone(),
            reconciled_from_ledger: self.reconciled_from_ledger,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct ProfileRow {
    subject_id: String,
    display_name: String,
    nationality_code: String,
    verification_status: String,
    wallet_address: Option<String>,
    credential_id: Option<String>,
    updated_at: DateTime<Utc>,
}

impl ProfileRow {
    fn into_profile(self) -> Result<SubjectProfile, StoreError> {
        let corrupt = |field: &str, e: &dyn std::fmt::Display| {
            StoreError::Corrupt(format!("profile {}: {field}: {e}", self.subject_id))
        };
        Ok(SubjectProfile {
            subject_id: SubjectId::new(self.subject_id.clone())
                .map_err(|e| corrupt("subject_id", &e))?,
            display_name: self.display_name.clone(),
            nationality_code: self.nationality_code.clone(),
            verification_status: self
                .verification_status
                .parse::<VerificationStatus>()
                .map_err(|e| corrupt("verification_status", &e))?,
            wallet_address: self
                .wallet_address
                .clone()
                .map(WalletAddress::new)
                .transpose()
                .map_err(|e| corrupt("wallet_address", &e))?,
            credential_id: self
                .credential_id
                .clone()
                .map(HumanReadableId::new)
                .transpose()
                .map_err(|e| corrupt("credential_id", &e))?,
            updated_at: self.updated_at,
        })
    }
}
