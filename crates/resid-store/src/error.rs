//! Store error type.

use thiserror::Error;

/// Failure of a record-store or profile-directory operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record already exists for this subject.
    #[error("an issuance record already exists for subject {0}")]
    DuplicateSubject(String),

    /// A record already exists for this wallet.
    #[error("an issuance record already exists for wallet {0}")]
    DuplicateWallet(String),

    /// The subject has no profile.
    #[error("no profile for subject {0}")]
    ProfileNotFound(String),

    /// The backing database failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be decoded into domain types.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the error is a uniqueness violation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::DuplicateSubject(_) | Self::DuplicateWallet(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Corrupt(e.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_flagged() {
        assert!(StoreError::DuplicateSubject("s".into()).is_conflict());
        assert!(StoreError::DuplicateWallet("w".into()).is_conflict());
        assert!(!StoreError::Database("down".into()).is_conflict());
    }

    #[test]
    fn sqlx_errors_map_to_database() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
