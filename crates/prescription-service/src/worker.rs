//! Anchor worker - submits queued digests to the ledger

use anyhow::Result;
use chrono::Utc;
use ledger_client::{Ledger, Receipt, SubmitOutcome};
use pharmachain_common::AnchorMemo;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::AnchorJob;
use crate::storage::Storage;

/// Anchor worker configuration
#[derive(Debug, Clone)]
pub struct AnchorWorkerConfig {
    /// `app` field of the memo
    pub app_id: String,

    /// Submissions per digest before the record is marked failed
    pub max_attempts: u32,

    /// Delay before the first retry; doubles with every attempt
    pub backoff: Duration,

    /// Retry delay cap
    pub max_backoff: Duration,

    /// How long one queue pop may block
    pub poll_timeout: Duration,
}

impl Default for AnchorWorkerConfig {
    fn default() -> Self {
        Self {
            app_id: "PharmaChain".to_string(),
            max_attempts: 5,
            backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            poll_timeout: Duration::from_secs(5),
        }
    }
}

impl AnchorWorkerConfig {
    /// Delay before retrying after `attempt` failed submissions
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// What happened to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Receipt attached to the record
    Anchored(Receipt),
    /// The record's digest changed; the job was discarded
    Stale,
    /// The digest already carries a receipt
    AlreadyAnchored,
    /// The record no longer exists
    Dropped,
    /// Submission failed and the job was re-queued
    Retrying { attempt: u32, delay: Duration },
    /// Submission failed too many times; the record is marked failed
    Exhausted,
}

/// Anchor worker
pub struct AnchorWorker {
    config: AnchorWorkerConfig,
    storage: Arc<dyn Storage>,
    ledger: Arc<dyn Ledger>,
}

impl AnchorWorker {
    /// Create a new worker
    pub fn new(config: AnchorWorkerConfig, storage: Arc<dyn Storage>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            config,
            storage,
            ledger,
        }
    }

    /// Start the worker loop
    pub async fn run(&self) {
        info!("Anchor worker started, waiting for jobs...");

        loop {
            match self.process_next(self.config.poll_timeout).await {
                Ok(Some(outcome)) => {
                    debug!("Anchor job finished: {:?}", outcome);
                }
                Ok(None) => {
                    // Timeout, continue loop
                }
                Err(e) => {
                    error!("Anchor worker error: {:#}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Pop and process one job, waiting up to `timeout` for it
    pub async fn process_next(&self, timeout: Duration) -> Result<Option<JobOutcome>> {
        match self.storage.pop_anchor(timeout).await? {
            Some(job) => Ok(Some(self.process_job(job).await?)),
            None => Ok(None),
        }
    }

    /// Process a single anchor job
    pub async fn process_job(&self, job: AnchorJob) -> Result<JobOutcome> {
        let Some(prescription) = self.storage.get_prescription(&job.uid).await? else {
            warn!("Dropping anchor job for missing prescription {}", job.uid);
            return Ok(JobOutcome::Dropped);
        };

        if prescription.data_hash.as_deref() != Some(job.digest.as_str()) {
            debug!("Anchor job for {} is stale", job.uid);
            return Ok(JobOutcome::Stale);
        }

        if let (Some(signature), Some(anchored_hash)) = (
            prescription.anchor.tx_signature.as_deref(),
            prescription.anchor.anchored_hash.as_deref(),
        ) {
            if anchored_hash == job.digest {
                // A racing save may have put the record back to pending
                let anchored_at = prescription.anchor.anchored_at.unwrap_or_else(Utc::now);
                let restored = self
                    .storage
                    .attach_receipt(&job.uid, &job.digest, signature, anchored_at)
                    .await?;
                if !restored {
                    return Ok(JobOutcome::Stale);
                }
                debug!("Digest of {} is already anchored", job.uid);
                return Ok(JobOutcome::AlreadyAnchored);
            }
        }

        let memo = AnchorMemo::new(
            self.config.app_id.as_str(),
            job.uid.as_str(),
            job.digest.as_str(),
            Utc::now().timestamp_millis(),
        )
        .to_bytes()?;

        info!(
            "Submitting digest of {} (attempt {})",
            job.uid,
            job.attempt + 1
        );

        match self.ledger.submit(&memo).await {
            SubmitOutcome::Confirmed(receipt) => {
                let attached = self
                    .storage
                    .attach_receipt(&job.uid, &job.digest, receipt.as_str(), Utc::now())
                    .await?;

                if attached {
                    info!("Prescription {} anchored: {}", job.uid, receipt);
                    Ok(JobOutcome::Anchored(receipt))
                } else {
                    warn!(
                        "Prescription {} changed while {} was confirming, receipt discarded",
                        job.uid, receipt
                    );
                    Ok(JobOutcome::Stale)
                }
            }
            SubmitOutcome::InsufficientFunds { balance } => {
                let reason = format!(
                    "Insufficient funds: signer {} has {} lamports",
                    self.ledger.signer(),
                    balance
                );
                self.handle_failure(job, reason).await
            }
            SubmitOutcome::Failed(e) => self.handle_failure(job, e.to_string()).await,
        }
    }

    async fn handle_failure(&self, job: AnchorJob, reason: String) -> Result<JobOutcome> {
        let attempts = job.attempt + 1;
        let exhausted = attempts >= self.config.max_attempts;

        let recorded = self
            .storage
            .record_anchor_failure(&job.uid, &job.digest, attempts, &reason, exhausted)
            .await?;
        if !recorded {
            return Ok(JobOutcome::Stale);
        }

        if exhausted {
            error!(
                "Giving up on {} after {} attempts: {}",
                job.uid, attempts, reason
            );
            return Ok(JobOutcome::Exhausted);
        }

        let delay = self.config.backoff_for(attempts);
        warn!(
            "Anchoring {} failed (attempt {}/{}), retrying in {:?}: {}",
            job.uid, attempts, self.config.max_attempts, delay, reason
        );
        self.schedule_retry(job.retry(), delay);

        Ok(JobOutcome::Retrying {
            attempt: attempts,
            delay,
        })
    }

    fn schedule_retry(&self, job: AnchorJob, delay: Duration) {
        let storage = self.storage.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = storage.enqueue_anchor(&job).await {
                error!("Failed to re-queue anchor job for {}: {:#}", job.uid, e);
            }
        });
    }

    /// Re-queue every record still waiting for the ledger.
    ///
    /// Delayed retries only live in memory, so this runs once at startup.
    /// A record that is also still in the persisted queue gets a second job;
    /// whichever runs later finds the digest anchored and skips it.
    pub async fn recover(&self) -> Result<usize> {
        let mut recovered = 0;

        for uid in self.storage.list_pending_anchors().await? {
            let Some(prescription) = self.storage.get_prescription(&uid).await? else {
                continue;
            };
            let Some(digest) = prescription.data_hash.clone() else {
                continue;
            };

            let mut job = AnchorJob::new(uid, digest);
            job.attempt = prescription.anchor.attempts;
            self.storage.enqueue_anchor(&job).await?;
            recovered += 1;
        }

        if recovered > 0 {
            info!("Recovered {} pending anchor jobs", recovered);
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = AnchorWorkerConfig {
            backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            ..Default::default()
        };

        assert_eq!(config.backoff_for(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for(3), Duration::from_secs(8));
        assert_eq!(config.backoff_for(4), Duration::from_secs(10));
        assert_eq!(config.backoff_for(40), Duration::from_secs(10));
    }
}
