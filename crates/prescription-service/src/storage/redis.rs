//! Redis storage backend
//!
//! Key layout:
//! - `user:{id}`: user JSON
//! - `user:email:{email}`: id of the user owning an email (`SET NX`)
//! - `users:next_id`, `prescriptions:next_id`: id counters
//! - `prescription:{uid}`: hash with a `content` JSON field plus the digest
//!   and anchor fields, so receipt updates can compare-and-set on `data_hash`
//! - `pharmacy:{id}:prescriptions`: uids by creation time
//! - `consumer:{id}:saved`: uids by save time
//! - `anchors:pending`: uids waiting for the ledger
//! - `anchor:queue`: anchor job JSON list

use super::{email_key, Storage};
use crate::models::{AnchorJob, AnchorStatus, Prescription, SavedPrescription, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const QUEUE_KEY: &str = "anchor:queue";
const PENDING_KEY: &str = "anchors:pending";

const ATTACH_RECEIPT_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'data_hash') ~= ARGV[1] then
    return 0
end
redis.call('HSET', KEYS[1],
    'tx_signature', ARGV[2],
    'anchored_hash', ARGV[1],
    'anchored_at', ARGV[3],
    'anchor_status', 'anchored')
redis.call('HDEL', KEYS[1], 'anchor_error')
redis.call('SREM', KEYS[2], ARGV[4])
return 1
"#;

const RECORD_FAILURE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'data_hash') ~= ARGV[1] then
    return 0
end
redis.call('HSET', KEYS[1], 'anchor_attempts', ARGV[2], 'anchor_error', ARGV[3])
if ARGV[4] == '1' then
    redis.call('HSET', KEYS[1], 'anchor_status', 'failed')
    redis.call('SREM', KEYS[2], ARGV[5])
end
return 1
"#;

fn user_key(id: u64) -> String {
    format!("user:{}", id)
}

fn prescription_key(uid: &str) -> String {
    format!("prescription:{}", uid)
}

fn pharmacy_key(pharmacy_id: u64) -> String {
    format!("pharmacy:{}:prescriptions", pharmacy_id)
}

fn saved_key(consumer_id: u64) -> String {
    format!("consumer:{}:saved", consumer_id)
}

/// Storage backed by Redis
pub struct RedisStorage {
    conn: ConnectionManager,

    /// Dedicated connection for BLPOP so a waiting worker never stalls
    /// requests on the shared connection
    queue_conn: ConnectionManager,
}

impl RedisStorage {
    /// Connect to Redis
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .context("Failed to connect to Redis")?;
        let queue_conn = ConnectionManager::new(client)
            .await
            .context("Failed to open Redis queue connection")?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn, queue_conn })
    }

    async fn get_user_json(&self, key: &str) -> Result<Option<User>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(key).await?;

        match json {
            Some(data) => {
                let user: User =
                    serde_json::from_str(&data).context("Failed to deserialize user")?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }
}

/// Rebuild a prescription from its hash fields
fn prescription_from_hash(mut fields: HashMap<String, String>) -> Result<Option<Prescription>> {
    let Some(content) = fields.remove("content") else {
        return Ok(None);
    };
    let mut prescription: Prescription =
        serde_json::from_str(&content).context("Failed to deserialize prescription")?;

    prescription.data_hash = fields.remove("data_hash");

    let anchor = &mut prescription.anchor;
    if let Some(status) = fields.get("anchor_status") {
        anchor.status = AnchorStatus::parse(status)
            .with_context(|| format!("Unknown anchor status '{}'", status))?;
    }
    anchor.attempts = match fields.get("anchor_attempts") {
        Some(attempts) => attempts.parse().context("Invalid anchor_attempts")?,
        None => 0,
    };
    anchor.last_error = fields.remove("anchor_error");
    anchor.tx_signature = fields.remove("tx_signature");
    anchor.anchored_hash = fields.remove("anchored_hash");
    anchor.anchored_at = match fields.get("anchored_at") {
        Some(millis) => {
            let millis: i64 = millis.parse().context("Invalid anchored_at")?;
            Utc.timestamp_millis_opt(millis).single()
        }
        None => None,
    };

    Ok(Some(prescription))
}

#[async_trait]
impl Storage for RedisStorage {
    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }

    async fn create_user(&self, email: &str, password_hash: Option<String>) -> Result<Option<User>> {
        let mut conn = self.conn.clone();
        let email = email_key(email);

        let id: u64 = conn.incr("users:next_id", 1).await?;

        // Claim the email first; losing the race leaves only an unused id
        let claimed: bool = conn.set_nx(format!("user:email:{}", email), id).await?;
        if !claimed {
            debug!("Email already registered: {}", email);
            return Ok(None);
        }

        let user = User::new(id, email, password_hash);
        let json = serde_json::to_string(&user).context("Failed to serialize user")?;
        let _: () = conn.set(user_key(id), json).await?;

        info!("Created user {}", id);
        Ok(Some(user))
    }

    async fn get_user(&self, id: u64) -> Result<Option<User>> {
        self.get_user_json(&user_key(id)).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut conn = self.conn.clone();
        let id: Option<u64> = conn
            .get(format!("user:email:{}", email_key(email)))
            .await?;

        match id {
            Some(id) => self.get_user(id).await,
            None => Ok(None),
        }
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut conn = self.conn.clone();
        let existing = self
            .get_user(user.id)
            .await?
            .with_context(|| format!("User {} does not exist", user.id))?;

        let mut updated = user.clone();
        updated.email = existing.email;

        let json = serde_json::to_string(&updated).context("Failed to serialize user")?;
        let _: () = conn.set(user_key(user.id), json).await?;

        debug!("Updated user {}", user.id);
        Ok(())
    }

    async fn next_prescription_id(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr("prescriptions:next_id", 1).await?;
        Ok(id)
    }

    async fn insert_prescription(&self, prescription: &Prescription) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = prescription_key(&prescription.uid);

        let json = serde_json::to_string(prescription).context("Failed to serialize prescription")?;

        let created: bool = conn.hset_nx(&key, "content", json).await?;
        if !created {
            anyhow::bail!("Prescription {} already exists", prescription.uid);
        }

        let _: () = redis::pipe()
            .atomic()
            .hset(&key, "anchor_status", prescription.anchor.status.as_str())
            .ignore()
            .zadd(
                pharmacy_key(prescription.pharmacy_id),
                &prescription.uid,
                prescription.created_at.timestamp_millis(),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!("Inserted prescription {}", prescription.uid);
        Ok(())
    }

    async fn get_prescription(&self, uid: &str) -> Result<Option<Prescription>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(prescription_key(uid)).await?;
        prescription_from_hash(fields)
    }

    async fn save_prescription(&self, prescription: &Prescription) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = prescription_key(&prescription.uid);

        let exists: bool = conn.exists(&key).await?;
        if !exists {
            anyhow::bail!("Prescription {} does not exist", prescription.uid);
        }

        let json = serde_json::to_string(prescription).context("Failed to serialize prescription")?;

        let mut fields = vec![
            ("content", json),
            ("anchor_status", prescription.anchor.status.as_str().to_string()),
            ("anchor_attempts", prescription.anchor.attempts.to_string()),
        ];
        if let Some(hash) = &prescription.data_hash {
            fields.push(("data_hash", hash.clone()));
        }

        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(&key, &fields).ignore();
        match &prescription.anchor.last_error {
            Some(error) => pipe.hset(&key, "anchor_error", error).ignore(),
            None => pipe.hdel(&key, "anchor_error").ignore(),
        };
        if prescription.anchor.status == AnchorStatus::Pending {
            pipe.sadd(PENDING_KEY, &prescription.uid).ignore();
        } else {
            pipe.srem(PENDING_KEY, &prescription.uid).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(
            "Saved prescription {} status: {:?}",
            prescription.uid, prescription.anchor.status
        );
        Ok(())
    }

    async fn list_pharmacy_prescriptions(&self, pharmacy_id: u64) -> Result<Vec<Prescription>> {
        let mut conn = self.conn.clone();
        let uids: Vec<String> = conn.zrevrange(pharmacy_key(pharmacy_id), 0, -1).await?;

        let mut prescriptions = Vec::with_capacity(uids.len());
        for uid in uids {
            if let Some(prescription) = self.get_prescription(&uid).await? {
                prescriptions.push(prescription);
            }
        }
        Ok(prescriptions)
    }

    async fn attach_receipt(
        &self,
        uid: &str,
        digest: &str,
        signature: &str,
        anchored_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let attached: i64 = redis::Script::new(ATTACH_RECEIPT_SCRIPT)
            .key(prescription_key(uid))
            .key(PENDING_KEY)
            .arg(digest)
            .arg(signature)
            .arg(anchored_at.timestamp_millis())
            .arg(uid)
            .invoke_async(&mut conn)
            .await
            .context("Failed to attach receipt")?;
        Ok(attached == 1)
    }

    async fn record_anchor_failure(
        &self,
        uid: &str,
        digest: &str,
        attempts: u32,
        error: &str,
        exhausted: bool,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let recorded: i64 = redis::Script::new(RECORD_FAILURE_SCRIPT)
            .key(prescription_key(uid))
            .key(PENDING_KEY)
            .arg(digest)
            .arg(attempts)
            .arg(error)
            .arg(if exhausted { "1" } else { "0" })
            .arg(uid)
            .invoke_async(&mut conn)
            .await
            .context("Failed to record anchor failure")?;
        Ok(recorded == 1)
    }

    async fn list_pending_anchors(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut uids: Vec<String> = conn.smembers(PENDING_KEY).await?;
        uids.sort();
        Ok(uids)
    }

    async fn save_for_consumer(&self, consumer_id: u64, uid: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(saved_key(consumer_id))
            .arg("NX")
            .arg(Utc::now().timestamp_millis())
            .arg(uid)
            .query_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn list_saved(&self, consumer_id: u64) -> Result<Vec<SavedPrescription>> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, i64)> = conn
            .zrevrange_withscores(saved_key(consumer_id), 0, -1)
            .await?;

        Ok(entries
            .into_iter()
            .map(|(uid, millis)| SavedPrescription {
                consumer_id,
                prescription_uid: uid,
                saved_at: Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
            .collect())
    }

    async fn enqueue_anchor(&self, job: &AnchorJob) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(job).context("Failed to serialize anchor job")?;
        let _: () = conn.rpush(QUEUE_KEY, json).await?;

        debug!("Queued anchor job for {} (attempt {})", job.uid, job.attempt);
        Ok(())
    }

    async fn pop_anchor(&self, timeout: Duration) -> Result<Option<AnchorJob>> {
        let mut conn = self.queue_conn.clone();
        let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout.as_secs_f64()).await?;

        match result {
            Some((_, json)) => {
                let job: AnchorJob =
                    serde_json::from_str(&json).context("Failed to deserialize anchor job")?;
                debug!("Popped anchor job for {}", job.uid);
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn queue_length(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(QUEUE_KEY).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrescriptionRequest;

    async fn get_test_storage() -> RedisStorage {
        RedisStorage::new("redis://127.0.0.1:6379/15")
            .await
            .expect("Failed to connect to test Redis")
    }

    fn draft(uid: &str) -> Prescription {
        Prescription::draft(
            1,
            uid.to_string(),
            42,
            PrescriptionRequest {
                medicine_name: "Amoxicillin".to_string(),
                dosage: "500mg".to_string(),
                frequency: 3,
                times: vec!["08:00".into(), "14:00".into(), "20:00".into()],
                instructions: None,
                patient_name: "Jane Doe".to_string(),
            },
        )
    }

    #[test]
    fn test_prescription_from_empty_hash() {
        assert!(prescription_from_hash(HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_prescription_from_hash_reads_anchor_fields() {
        let p = draft("rx-hash");
        let mut fields = HashMap::new();
        fields.insert("content".to_string(), serde_json::to_string(&p).unwrap());
        fields.insert("data_hash".to_string(), "aa".to_string());
        fields.insert("anchor_status".to_string(), "anchored".to_string());
        fields.insert("anchor_attempts".to_string(), "2".to_string());
        fields.insert("tx_signature".to_string(), "sig".to_string());
        fields.insert("anchored_hash".to_string(), "aa".to_string());
        fields.insert("anchored_at".to_string(), "1700000000000".to_string());

        let restored = prescription_from_hash(fields).unwrap().unwrap();
        assert_eq!(restored.data_hash.as_deref(), Some("aa"));
        assert_eq!(restored.anchor.status, AnchorStatus::Anchored);
        assert_eq!(restored.anchor.attempts, 2);
        assert_eq!(restored.anchor.tx_signature.as_deref(), Some("sig"));
        assert_eq!(
            restored.anchor.anchored_at.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[tokio::test]
    #[ignore] // Only run when Redis is available
    async fn test_receipt_compare_and_set() {
        let storage = get_test_storage().await;
        let uid = format!("test-{}", uuid::Uuid::new_v4());

        let mut p = draft(&uid);
        storage.insert_prescription(&p).await.unwrap();
        p.record_digest("aaaa".into());
        storage.save_prescription(&p).await.unwrap();
        assert!(storage.list_pending_anchors().await.unwrap().contains(&uid));

        assert!(!storage
            .attach_receipt(&uid, "bbbb", "sig-stale", Utc::now())
            .await
            .unwrap());
        assert!(storage
            .attach_receipt(&uid, "aaaa", "sig", Utc::now())
            .await
            .unwrap());

        let stored = storage.get_prescription(&uid).await.unwrap().unwrap();
        assert_eq!(stored.anchor.status, AnchorStatus::Anchored);
        assert_eq!(stored.anchor.tx_signature.as_deref(), Some("sig"));
        assert_eq!(stored.anchor.anchored_hash.as_deref(), Some("aaaa"));
        assert!(!storage.list_pending_anchors().await.unwrap().contains(&uid));
    }

    #[tokio::test]
    #[ignore]
    async fn test_failure_exhaustion_marks_failed() {
        let storage = get_test_storage().await;
        let uid = format!("test-{}", uuid::Uuid::new_v4());

        let mut p = draft(&uid);
        storage.insert_prescription(&p).await.unwrap();
        p.record_digest("aaaa".into());
        storage.save_prescription(&p).await.unwrap();

        assert!(storage
            .record_anchor_failure(&uid, "aaaa", 5, "no funds", true)
            .await
            .unwrap());

        let stored = storage.get_prescription(&uid).await.unwrap().unwrap();
        assert_eq!(stored.anchor.status, AnchorStatus::Failed);
        assert_eq!(stored.anchor.attempts, 5);
        assert_eq!(stored.anchor.last_error.as_deref(), Some("no funds"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_queue_roundtrip() {
        let storage = get_test_storage().await;
        let uid = format!("test-{}", uuid::Uuid::new_v4());

        let job = AnchorJob::new(uid.clone(), "aaaa".into());
        storage.enqueue_anchor(&job).await.unwrap();

        let popped = storage
            .pop_anchor(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("job should be queued");
        assert_eq!(popped, job);
    }
}
