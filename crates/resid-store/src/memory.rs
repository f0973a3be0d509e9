//! # In-Memory Record Store
//!
//! Process-local backend used when no database is configured and by tests
//! across the workspace. State is lost on restart.
//!
//! Transactions buffer their writes and apply them at commit under the
//! table write lock, re-checking both uniqueness constraints first. Per
//! subject serialization uses one async mutex per subject, held by the
//! transaction until it ends. A subject's mutex is removed from the map
//! once no transaction holds or waits on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use resid_core::{
    HumanReadableId, IssuanceRecord, SubjectId, SubjectProfile, VerificationStatus, WalletAddress,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::{ProfileDirectory, RecordStore, StoreTransaction};

#[derive(Default)]
struct Tables {
    records: HashMap<SubjectId, IssuanceRecord>,
    wallets: HashMap<WalletAddress, SubjectId>,
    profiles: HashMap<SubjectId, SubjectProfile>,
}

impl Tables {
    fn check_unique(&self, record: &IssuanceRecord) -> Result<(), StoreError> {
        if self.records.contains_key(&record.subject_id) {
            return Err(StoreError::DuplicateSubject(record.subject_id.to_string()));
        }
        if self.wallets.contains_key(&record.wallet_address) {
            return Err(StoreError::DuplicateWallet(record.wallet_address.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    subject_locks: DashMap<SubjectId, Arc<Mutex<()>>>,
    failing_commits: AtomicU32,
}

/// Record store and profile directory held in process memory.
///
/// Cloning shares state.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.inner.tables.read();
        f.debug_struct("MemoryRecordStore")
            .field("records", &tables.records.len())
            .field("profiles", &tables.profiles.len())
            .finish()
    }
}

impl MemoryRecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with a database error.
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of committed records.
    pub fn record_count(&self) -> usize {
        self.inner.tables.read().records.len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            guards: Vec::new(),
            created: Vec::new(),
            links: Vec::new(),
        }))
    }

    async fn find_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<IssuanceRecord>, StoreError> {
        Ok(self.inner.tables.read().records.get(subject).cloned())
    }

    async fn find_by_wallet(
        &self,
        wallet: &WalletAddress,
    ) -> Result<Option<IssuanceRecord>, StoreError> {
        let tables = self.inner.tables.read();
        Ok(tables
            .wallets
            .get(wallet)
            .and_then(|subject| tables.records.get(subject))
            .cloned())
    }
}

#[async_trait]
impl ProfileDirectory for MemoryRecordStore {
    async fn profile(&self, subject: &SubjectId) -> Result<Option<SubjectProfile>, StoreError> {
        Ok(self.inner.tables.read().profiles.get(subject).cloned())
    }

    async fn upsert_profile(&self, profile: &SubjectProfile) -> Result<SubjectProfile, StoreError> {
        let mut tables = self.inner.tables.write();
        let now = Utc::now();
        let stored = match tables.profiles.get_mut(&profile.subject_id) {
            Some(existing) => {
                existing.display_name = profile.display_name.clone();
                existing.nationality_code = profile.nationality_code.clone();
                existing.verification_status = profile.verification_status;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let mut fresh = profile.clone();
                fresh.wallet_address = None;
                fresh.credential_id = None;
                fresh.updated_at = now;
                tables.profiles.insert(fresh.subject_id.clone(), fresh.clone());
                fresh
            }
        };
        Ok(stored)
    }

    async fn set_verification_status(
        &self,
        subject: &SubjectId,
        status: VerificationStatus,
    ) -> Result<SubjectProfile, StoreError> {
        let mut tables = self.inner.tables.write();
        let profile = tables
            .profiles
            .get_mut(subject)
            .ok_or_else(|| StoreError::ProfileNotFound(subject.to_string()))?;
        profile.verification_status = status;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    guards: Vec<(SubjectId, OwnedMutexGuard<()>)>,
    created: Vec<IssuanceRecord>,
    links: Vec<(SubjectId, WalletAddress, HumanReadableId)>,
}

impl MemoryTransaction {
    fn apply(&mut self) -> Result<(), StoreError> {
        let mut tables = self.inner.tables.write();
        if self
            .inner
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Database("injected commit failure".into()));
        }

        for record in &self.created {
            tables.check_unique(record)?;
        }
        for record in self.created.drain(..) {
            tables
                .wallets
                .insert(record.wallet_address.clone(), record.subject_id.clone());
            tables.records.insert(record.subject_id.clone(), record);
        }
        let now = Utc::now();
        for (subject, wallet, credential_id) in self.links.drain(..) {
            if let Some(profile) = tables.profiles.get_mut(&subject) {
                profile.wallet_address = Some(wallet);
                profile.credential_id = Some(credential_id);
                profile.updated_at = now;
            }
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        for (subject, guard) in self.guards.drain(..) {
            drop(guard);
            self.inner
                .subject_locks
                .remove_if(&subject, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_subject(&mut self, subject: &SubjectId) -> Result<(), StoreError> {
        if self.guards.iter().any(|(held, _)| held == subject) {
            return Ok(());
        }
        let lock = Arc::clone(&self.inner.subject_locks.entry(subject.clone()).or_default());
        let guard = lock.lock_owned().await;
        self.guards.push((subject.clone(), guard));
        Ok(())
    }

    async fn find_by_subject(
        &mut self,
        subject: &SubjectId,
    ) -> Result<Option<IssuanceRecord>, StoreError> {
        if let Some(pending) = self.created.iter().find(|r| &r.subject_id == subject) {
            return Ok(Some(pending.clone()));
        }
        Ok(self.inner.tables.read().records.get(subject).cloned())
    }

    async fn find_by_wallet(
        &mut self,
        wallet: &WalletAddress,
    ) -> Result<Option<IssuanceRecord>, StoreError> {
        if let Some(pending) = self.created.iter().find(|r| &r.wallet_address == wallet) {
            return Ok(Some(pending.clone()));
        }
        let tables = self.inner.tables.read();
        Ok(tables
            .wallets
            .get(wallet)
            .and_then(|subject| tables.records.get(subject))
            .cloned())
    }

    async fn create(&mut self, record: &IssuanceRecord) -> Result<(), StoreError> {
        self.inner.tables.read().check_unique(record)?;
        if self.created.iter().any(|r| r.subject_id == record.subject_id) {
            return Err(StoreError::DuplicateSubject(record.subject_id.to_string()));
        }
        if self.created.iter().any(|r| r.wallet_address == record.wallet_address) {
            return Err(StoreError::DuplicateWallet(record.wallet_address.to_string()));
        }
        self.created.push(record.clone());
        Ok(())
    }

    async fn link_profile(
        &mut self,
        subject: &SubjectId,
        wallet: &WalletAddress,
        credential_id: &HumanReadableId,
    ) -> Result<(), StoreError> {
        self.links
            .push((subject.clone(), wallet.clone(), credential_id.clone()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.apply()
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
