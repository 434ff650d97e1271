//! Prescription issuing and the anchoring workflow
//!
//! A new record moves through these states:
//! 1. Drafted: core fields inserted, no digest or code
//! 2. Digested: content digest computed
//! 3. Coded: code, digest and `pending` status written in one store update
//! 4. Submitted: an anchor job is queued for the worker
//!
//! Callers get the Coded record back immediately; the receipt is attached
//! later by [`crate::worker::AnchorWorker`].

use pharmachain_common::{digest, validate, Error, Result};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::models::{
    AnchorJob, PharmacySummary, Prescription, PrescriptionDetails, PrescriptionRequest,
    Role, UpdatePrescriptionRequest,
};
use crate::qr::QrCodeGenerator;
use crate::storage::Storage;

/// Attach the issuing pharmacy's name and email
pub async fn with_pharmacy(
    storage: &dyn Storage,
    prescription: Prescription,
) -> Result<PrescriptionDetails> {
    let pharmacy = storage
        .get_user(prescription.pharmacy_id)
        .await?
        .map(|user| PharmacySummary {
            name: user.name,
            email: user.email,
        });
    Ok(PrescriptionDetails {
        prescription,
        pharmacy,
    })
}

/// Prescription operations
pub struct AnchoringService {
    storage: Arc<dyn Storage>,
    codes: QrCodeGenerator,
}

impl AnchoringService {
    pub fn new(storage: Arc<dyn Storage>, codes: QrCodeGenerator) -> Self {
        Self { storage, codes }
    }

    /// Issue a prescription
    pub async fn create(&self, actor: &AuthUser, request: PrescriptionRequest) -> Result<Prescription> {
        actor.require_pharmacy("create prescriptions")?;
        self.issue(actor, request).await
    }

    /// Issue a prescription and save it to a consumer's account
    pub async fn create_for_patient(
        &self,
        actor: &AuthUser,
        patient_id: u64,
        request: PrescriptionRequest,
    ) -> Result<Prescription> {
        actor.require_pharmacy("create prescriptions")?;

        let patient = self.storage.get_user(patient_id).await?;
        if patient.and_then(|p| p.role) != Some(Role::Consumer) {
            return Err(Error::not_found("Patient not found"));
        }

        let prescription = self.issue(actor, request).await?;
        self.storage
            .save_for_consumer(patient_id, &prescription.uid)
            .await?;

        info!(
            "Prescription {} saved for patient {}",
            prescription.uid, patient_id
        );
        Ok(prescription)
    }

    async fn issue(&self, actor: &AuthUser, request: PrescriptionRequest) -> Result<Prescription> {
        let uid = Uuid::new_v4().to_string();
        let mut prescription = Prescription::draft(0, uid, actor.id, request);
        validate(&prescription.digest_input(), &prescription.uid)?;

        prescription.id = self.storage.next_prescription_id().await?;
        self.storage.insert_prescription(&prescription).await?;

        info!(
            "Drafted prescription {} for pharmacy {}",
            prescription.uid, actor.id
        );
        self.seal(prescription).await
    }

    /// Edit a prescription; absent fields keep their values
    pub async fn update(
        &self,
        actor: &AuthUser,
        uid: &str,
        request: UpdatePrescriptionRequest,
    ) -> Result<Prescription> {
        actor.require_pharmacy("update prescriptions")?;

        let mut prescription = self.owned(actor, uid).await?;
        prescription.apply(request);
        validate(&prescription.digest_input(), &prescription.uid)?;

        info!("Updating prescription {}", uid);
        self.seal(prescription).await
    }

    /// Queue a record for anchoring again, resetting its attempt count
    pub async fn retry(&self, actor: &AuthUser, uid: &str) -> Result<Prescription> {
        actor.require_pharmacy("anchor prescriptions")?;

        let prescription = self.owned(actor, uid).await?;
        if prescription.is_anchor_current() {
            return Err(Error::Conflict(format!(
                "Prescription {} is already anchored",
                uid
            )));
        }

        info!("Retrying anchoring for {}", uid);
        self.seal(prescription).await
    }

    /// Load a record the caller issued
    async fn owned(&self, actor: &AuthUser, uid: &str) -> Result<Prescription> {
        let prescription = self
            .storage
            .get_prescription(uid)
            .await?
            .ok_or_else(|| Error::not_found("Prescription not found"))?;

        if prescription.pharmacy_id != actor.id {
            return Err(Error::unauthorized("Not authorized"));
        }
        Ok(prescription)
    }

    /// Digest, code, persist and queue
    async fn seal(&self, mut prescription: Prescription) -> Result<Prescription> {
        let content_digest = digest(&prescription.digest_input(), &prescription.uid)?;
        let code = self.codes.generate(&prescription.uid)?;

        prescription.qr_code = Some(code.data_uri);
        prescription.code_url = Some(code.url);
        let needs_receipt = prescription.record_digest(content_digest.to_hex());
        self.storage.save_prescription(&prescription).await?;

        if !needs_receipt {
            info!(
                "Digest of {} is unchanged and already anchored",
                prescription.uid
            );
            return Ok(prescription);
        }

        let job = AnchorJob::new(prescription.uid.clone(), content_digest.to_hex());
        self.storage.enqueue_anchor(&job).await?;

        info!(
            "Prescription {} queued for anchoring with digest {}",
            prescription.uid, content_digest
        );
        Ok(prescription)
    }

    /// Prescriptions issued by the caller, newest first
    pub async fn list_for_pharmacy(&self, actor: &AuthUser) -> Result<Vec<Prescription>> {
        Ok(self.storage.list_pharmacy_prescriptions(actor.id).await?)
    }

    /// Public lookup by uid
    pub async fn get(&self, uid: &str) -> Result<PrescriptionDetails> {
        let prescription = self
            .storage
            .get_prescription(uid)
            .await?
            .ok_or_else(|| Error::not_found("Prescription not found"))?;
        with_pharmacy(self.storage.as_ref(), prescription).await
    }

    /// Save a prescription to the caller's account; saving twice is a no-op
    pub async fn save_for_consumer(&self, actor: &AuthUser, uid: &str) -> Result<()> {
        if self.storage.get_prescription(uid).await?.is_none() {
            return Err(Error::not_found("Prescription not found"));
        }
        if self.storage.save_for_consumer(actor.id, uid).await? {
            info!("User {} saved prescription {}", actor.id, uid);
        }
        Ok(())
    }

    /// The caller's saved prescriptions, newest first
    pub async fn list_saved(&self, actor: &AuthUser) -> Result<Vec<PrescriptionDetails>> {
        let mut prescriptions = Vec::new();
        for saved in self.storage.list_saved(actor.id).await? {
            if let Some(p) = self.storage.get_prescription(&saved.prescription_uid).await? {
                prescriptions.push(with_pharmacy(self.storage.as_ref(), p).await?);
            }
        }
        Ok(prescriptions)
    }
}
