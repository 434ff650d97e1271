//! Ledger verification of a prescription's receipt

use ledger_client::{Confirmation, Ledger, Receipt};
use pharmachain_common::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::storage::Storage;

/// Reason given when a record has no receipt yet
pub const NOT_ANCHORED_REASON: &str = "Not yet stored on chain";

/// Verification result body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub verified: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<Confirmation>,

    /// Digest the receipt proves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchored_hash: Option<String>,

    /// Whether the anchored digest is the record's current digest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_to_date: Option<bool>,
}

/// Outcome of verifying a uid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    NotFound,
    Checked(VerificationResponse),
}

/// Read-only check of stored receipts against the ledger
pub struct Verifier {
    storage: Arc<dyn Storage>,
    ledger: Arc<dyn Ledger>,
}

impl Verifier {
    pub fn new(storage: Arc<dyn Storage>, ledger: Arc<dyn Ledger>) -> Self {
        Self { storage, ledger }
    }

    pub async fn verify(&self, uid: &str) -> Result<Verification> {
        let Some(prescription) = self.storage.get_prescription(uid).await? else {
            return Ok(Verification::NotFound);
        };

        let Some(signature) = prescription.anchor.tx_signature.clone() else {
            return Ok(Verification::Checked(VerificationResponse {
                verified: false,
                signature: None,
                explorer_url: None,
                reason: Some(NOT_ANCHORED_REASON.to_string()),
                confirmation: None,
                anchored_hash: None,
                up_to_date: None,
            }));
        };

        let receipt = Receipt::new(signature);
        let confirmation = self.ledger.confirmation(&receipt).await;
        debug!("Receipt {} for {}: {:?}", receipt, uid, confirmation);

        Ok(Verification::Checked(VerificationResponse {
            verified: confirmation.is_confirmed(),
            explorer_url: Some(self.ledger.explorer_url(&receipt)),
            signature: Some(receipt.0),
            reason: None,
            confirmation: Some(confirmation),
            up_to_date: Some(prescription.is_anchor_current()),
            anchored_hash: prescription.anchor.anchored_hash,
        }))
    }
}
