//! In-process storage backend

use super::{email_key, Storage};
use crate::models::{AnchorJob, AnchorStatus, Prescription, SavedPrescription, User};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[derive(Default)]
struct State {
    users: HashMap<u64, User>,
    emails: HashMap<String, u64>,
    next_user_id: u64,
    prescriptions: HashMap<String, Prescription>,
    next_prescription_id: u64,
    saved: HashMap<u64, Vec<SavedPrescription>>,
    pending: HashSet<String>,
    queue: VecDeque<AnchorJob>,
}

/// Storage kept in memory; contents are lost on restart
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
    queued: Notify,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn create_user(&self, email: &str, password_hash: Option<String>) -> Result<Option<User>> {
        let mut state = self.state.lock().await;
        let key = email_key(email);
        if state.emails.contains_key(&key) {
            return Ok(None);
        }

        state.next_user_id += 1;
        let user = User::new(state.next_user_id, key.clone(), password_hash);
        state.emails.insert(key, user.id);
        state.users.insert(user.id, user.clone());

        debug!("Created user {}", user.id);
        Ok(Some(user))
    }

    async fn get_user(&self, id: u64) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .emails
            .get(&email_key(email))
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.lock().await;
        let email = state
            .users
            .get(&user.id)
            .map(|existing| existing.email.clone())
            .ok_or_else(|| anyhow::anyhow!("User {} does not exist", user.id))?;

        let mut updated = user.clone();
        updated.email = email;
        state.users.insert(user.id, updated);
        Ok(())
    }

    async fn next_prescription_id(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.next_prescription_id += 1;
        Ok(state.next_prescription_id)
    }

    async fn insert_prescription(&self, prescription: &Prescription) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.prescriptions.contains_key(&prescription.uid) {
            anyhow::bail!("Prescription {} already exists", prescription.uid);
        }
        state
            .prescriptions
            .insert(prescription.uid.clone(), prescription.clone());
        Ok(())
    }

    async fn get_prescription(&self, uid: &str) -> Result<Option<Prescription>> {
        Ok(self.state.lock().await.prescriptions.get(uid).cloned())
    }

    async fn save_prescription(&self, prescription: &Prescription) -> Result<()> {
        let mut state = self.state.lock().await;
        let existing = state
            .prescriptions
            .get(&prescription.uid)
            .ok_or_else(|| anyhow::anyhow!("Prescription {} does not exist", prescription.uid))?;

        let mut updated = prescription.clone();
        updated.anchor.tx_signature = existing.anchor.tx_signature.clone();
        updated.anchor.anchored_hash = existing.anchor.anchored_hash.clone();
        updated.anchor.anchored_at = existing.anchor.anchored_at;

        if updated.anchor.status == AnchorStatus::Pending {
            state.pending.insert(updated.uid.clone());
        } else {
            state.pending.remove(&updated.uid);
        }
        state.prescriptions.insert(updated.uid.clone(), updated);
        Ok(())
    }

    async fn list_pharmacy_prescriptions(&self, pharmacy_id: u64) -> Result<Vec<Prescription>> {
        let state = self.state.lock().await;
        let mut prescriptions: Vec<Prescription> = state
            .prescriptions
            .values()
            .filter(|p| p.pharmacy_id == pharmacy_id)
            .cloned()
            .collect();
        prescriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(prescriptions)
    }

    async fn attach_receipt(
        &self,
        uid: &str,
        digest: &str,
        signature: &str,
        anchored_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(prescription) = state.prescriptions.get_mut(uid) else {
            return Ok(false);
        };
        if prescription.data_hash.as_deref() != Some(digest) {
            return Ok(false);
        }

        prescription.anchor.status = AnchorStatus::Anchored;
        prescription.anchor.tx_signature = Some(signature.to_string());
        prescription.anchor.anchored_hash = Some(digest.to_string());
        prescription.anchor.anchored_at = Some(anchored_at);
        prescription.anchor.last_error = None;
        state.pending.remove(uid);
        Ok(true)
    }

    async fn record_anchor_failure(
        &self,
        uid: &str,
        digest: &str,
        attempts: u32,
        error: &str,
        exhausted: bool,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(prescription) = state.prescriptions.get_mut(uid) else {
            return Ok(false);
        };
        if prescription.data_hash.as_deref() != Some(digest) {
            return Ok(false);
        }

        prescription.anchor.attempts = attempts;
        prescription.anchor.last_error = Some(error.to_string());
        if exhausted {
            prescription.anchor.status = AnchorStatus::Failed;
            state.pending.remove(uid);
        }
        Ok(true)
    }

    async fn list_pending_anchors(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut uids: Vec<String> = state.pending.iter().cloned().collect();
        uids.sort();
        Ok(uids)
    }

    async fn save_for_consumer(&self, consumer_id: u64, uid: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let saved = state.saved.entry(consumer_id).or_default();
        if saved.iter().any(|s| s.prescription_uid == uid) {
            return Ok(false);
        }
        saved.push(SavedPrescription {
            consumer_id,
            prescription_uid: uid.to_string(),
            saved_at: Utc::now(),
        });
        Ok(true)
    }

    async fn list_saved(&self, consumer_id: u64) -> Result<Vec<SavedPrescription>> {
        let state = self.state.lock().await;
        let mut saved = state.saved.get(&consumer_id).cloned().unwrap_or_default();
        saved.reverse();
        Ok(saved)
    }

    async fn enqueue_anchor(&self, job: &AnchorJob) -> Result<()> {
        self.state.lock().await.queue.push_back(job.clone());
        self.queued.notify_one();
        debug!("Queued anchor job for {} (attempt {})", job.uid, job.attempt);
        Ok(())
    }

    async fn pop_anchor(&self, timeout: Duration) -> Result<Option<AnchorJob>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.state.lock().await.queue.pop_front() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, self.queued.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn queue_length(&self) -> Result<usize> {
        Ok(self.state.lock().await.queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrescriptionRequest;

    fn draft(id: u64, uid: &str, pharmacy_id: u64) -> Prescription {
        Prescription::draft(
            id,
            uid.to_string(),
            pharmacy_id,
            PrescriptionRequest {
                medicine_name: "Ibuprofen".to_string(),
                dosage: "200mg".to_string(),
                frequency: 2,
                times: vec!["09:00".into(), "21:00".into()],
                instructions: None,
                patient_name: "John Roe".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected_case_insensitively() {
        let storage = MemoryStorage::new();

        let first = storage.create_user("Nurse@Example.com", None).await.unwrap();
        assert!(first.is_some());

        let second = storage.create_user("nurse@example.com", None).await.unwrap();
        assert!(second.is_none());

        let found = storage.get_user_by_email("NURSE@example.com").await.unwrap();
        assert_eq!(found.unwrap().id, first.unwrap().id);
    }

    #[tokio::test]
    async fn test_receipt_only_attached_for_current_digest() {
        let storage = MemoryStorage::new();
        let mut p = draft(1, "rx-1", 1);
        storage.insert_prescription(&p).await.unwrap();

        p.record_digest("aaaa".into());
        storage.save_prescription(&p).await.unwrap();

        assert!(!storage
            .attach_receipt("rx-1", "bbbb", "sig-old", Utc::now())
            .await
            .unwrap());
        assert!(storage
            .attach_receipt("rx-1", "aaaa", "sig-new", Utc::now())
            .await
            .unwrap());

        let stored = storage.get_prescription("rx-1").await.unwrap().unwrap();
        assert_eq!(stored.anchor.status, AnchorStatus::Anchored);
        assert_eq!(stored.anchor.tx_signature.as_deref(), Some("sig-new"));
        assert_eq!(stored.anchor.anchored_hash.as_deref(), Some("aaaa"));
        assert!(storage.list_pending_anchors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_keeps_receipt_fields() {
        let storage = MemoryStorage::new();
        let mut p = draft(1, "rx-1", 1);
        storage.insert_prescription(&p).await.unwrap();
        p.record_digest("aaaa".into());
        storage.save_prescription(&p).await.unwrap();
        storage
            .attach_receipt("rx-1", "aaaa", "sig", Utc::now())
            .await
            .unwrap();

        // a stale copy without the receipt must not erase it
        p.dosage = "400mg".to_string();
        p.record_digest("cccc".into());
        storage.save_prescription(&p).await.unwrap();

        let stored = storage.get_prescription("rx-1").await.unwrap().unwrap();
        assert_eq!(stored.dosage, "400mg");
        assert_eq!(stored.anchor.status, AnchorStatus::Pending);
        assert_eq!(stored.anchor.tx_signature.as_deref(), Some("sig"));
        assert_eq!(stored.anchor.anchored_hash.as_deref(), Some("aaaa"));
        assert_eq!(storage.list_pending_anchors().await.unwrap(), vec!["rx-1"]);
    }

    #[tokio::test]
    async fn test_pharmacy_listing_is_scoped_and_newest_first() {
        let storage = MemoryStorage::new();
        storage.insert_prescription(&draft(1, "a", 10)).await.unwrap();
        storage.insert_prescription(&draft(2, "b", 20)).await.unwrap();
        storage.insert_prescription(&draft(3, "c", 10)).await.unwrap();

        let listed = storage.list_pharmacy_prescriptions(10).await.unwrap();
        let uids: Vec<&str> = listed.iter().map(|p| p.uid.as_str()).collect();
        assert_eq!(uids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_saving_twice_is_a_no_op() {
        let storage = MemoryStorage::new();
        assert!(storage.save_for_consumer(5, "rx-1").await.unwrap());
        assert!(!storage.save_for_consumer(5, "rx-1").await.unwrap());
        assert_eq!(storage.list_saved(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_pop_times_out_when_empty() {
        let storage = MemoryStorage::new();
        let popped = storage.pop_anchor(Duration::from_millis(20)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_queue_wakes_waiting_consumer() {
        let storage = std::sync::Arc::new(MemoryStorage::new());

        let waiter = {
            let storage = storage.clone();
            tokio::spawn(async move { storage.pop_anchor(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        storage
            .enqueue_anchor(&AnchorJob::new("rx-1".into(), "aaaa".into()))
            .await
            .unwrap();

        let job = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(job.uid, "rx-1");
        assert_eq!(storage.queue_length().await.unwrap(), 0);
    }
}
