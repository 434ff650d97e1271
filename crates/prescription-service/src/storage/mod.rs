//! Record store for users, prescriptions and the anchoring queue
//!
//! Two backends implement [`Storage`]:
//! - [`RedisStorage`] for deployments
//! - [`MemoryStorage`] for development and tests
//!
//! Receipt fields of a prescription (`txSignature`, `anchoredHash`,
//! `anchoredAt`) are only ever written by [`Storage::attach_receipt`], and only
//! while the record's current digest still matches the one being anchored.

mod memory;
mod redis;

pub use self::memory::MemoryStorage;
pub use self::redis::RedisStorage;

use crate::models::{AnchorJob, Prescription, SavedPrescription, User};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Storage backend
#[async_trait]
pub trait Storage: Send + Sync {
    /// Check that the backend is reachable
    async fn health_check(&self) -> Result<()>;

    /// Create a user. Returns `None` if the email is already registered.
    async fn create_user(&self, email: &str, password_hash: Option<String>) -> Result<Option<User>>;

    async fn get_user(&self, id: u64) -> Result<Option<User>>;

    /// Case-insensitive lookup
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Overwrite a user's profile (email stays fixed)
    async fn update_user(&self, user: &User) -> Result<()>;

    /// Allocate the next internal prescription id
    async fn next_prescription_id(&self) -> Result<u64>;

    /// Insert a new record and index it under its pharmacy
    async fn insert_prescription(&self, prescription: &Prescription) -> Result<()>;

    async fn get_prescription(&self, uid: &str) -> Result<Option<Prescription>>;

    /// Write content, code, digest and anchor status in one atomic update.
    /// Receipt fields are left untouched.
    async fn save_prescription(&self, prescription: &Prescription) -> Result<()>;

    /// Prescriptions issued by a pharmacy, newest first
    async fn list_pharmacy_prescriptions(&self, pharmacy_id: u64) -> Result<Vec<Prescription>>;

    /// Attach a receipt if the record's digest is still `digest`.
    /// Returns `false` when an edit replaced the digest in the meantime.
    async fn attach_receipt(
        &self,
        uid: &str,
        digest: &str,
        signature: &str,
        anchored_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record a failed attempt if the record's digest is still `digest`.
    /// With `exhausted` set the record moves to `failed`.
    async fn record_anchor_failure(
        &self,
        uid: &str,
        digest: &str,
        attempts: u32,
        error: &str,
        exhausted: bool,
    ) -> Result<bool>;

    /// Uids of records still waiting for the ledger
    async fn list_pending_anchors(&self) -> Result<Vec<String>>;

    /// Save a prescription to a consumer's account. Returns `false` if it
    /// was already saved.
    async fn save_for_consumer(&self, consumer_id: u64, uid: &str) -> Result<bool>;

    /// Saved prescriptions of a consumer, newest first
    async fn list_saved(&self, consumer_id: u64) -> Result<Vec<SavedPrescription>>;

    /// Push a job onto the anchoring queue
    async fn enqueue_anchor(&self, job: &AnchorJob) -> Result<()>;

    /// Pop the next job, waiting up to `timeout`
    async fn pop_anchor(&self, timeout: Duration) -> Result<Option<AnchorJob>>;

    async fn queue_length(&self) -> Result<usize>;
}

/// Normalize an email for indexing
pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}
