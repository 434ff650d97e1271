//! Data models for the prescription service

use chrono::{DateTime, Utc};
use pharmachain_common::DigestInput;
use serde::{Deserialize, Serialize};

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Pharmacy,
    Consumer,
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub email: String,

    /// bcrypt hash; absent for accounts created through OAuth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Set when the profile is completed
    #[serde(default)]
    pub role: Option<Role>,

    #[serde(default)]
    pub avatar: Option<String>,

    #[serde(default)]
    pub google_id: Option<String>,

    #[serde(default)]
    pub pharmacy_name: Option<String>,

    #[serde(default)]
    pub licence_url: Option<String>,

    pub is_profile_complete: bool,

    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a password account with an incomplete profile
    pub fn new(id: u64, email: String, password_hash: Option<String>) -> Self {
        Self {
            id,
            email,
            password_hash,
            name: None,
            role: None,
            avatar: None,
            google_id: None,
            pharmacy_name: None,
            licence_url: None,
            is_profile_complete: false,
            created_at: Utc::now(),
        }
    }
}

/// Public view of a user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: u64,
    pub email: String,
    pub name: Option<String>,
    pub role: Option<Role>,
    pub avatar: Option<String>,
    pub google_id: Option<String>,
    pub pharmacy_name: Option<String>,
    pub licence_url: Option<String>,
    pub is_profile_complete: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            avatar: user.avatar.clone(),
            google_id: user.google_id.clone(),
            pharmacy_name: user.pharmacy_name.clone(),
            licence_url: user.licence_url.clone(),
            is_profile_complete: user.is_profile_complete,
        }
    }
}

/// Where a prescription is in the anchoring lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    /// Inserted, no digest or code yet
    Draft,
    /// Digest and code stored, waiting for the ledger
    Pending,
    /// Current digest is anchored
    Anchored,
    /// Gave up after the configured number of attempts
    Failed,
}

impl AnchorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorStatus::Draft => "draft",
            AnchorStatus::Pending => "pending",
            AnchorStatus::Anchored => "anchored",
            AnchorStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(AnchorStatus::Draft),
            "pending" => Some(AnchorStatus::Pending),
            "anchored" => Some(AnchorStatus::Anchored),
            "failed" => Some(AnchorStatus::Failed),
            _ => None,
        }
    }
}

/// Ledger evidence for a prescription
///
/// `tx_signature` and `anchored_hash` are always written together: the
/// signature proves exactly `anchored_hash`, which may lag behind the
/// record's current digest after an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorState {
    pub status: AnchorStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchored_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchored_at: Option<DateTime<Utc>>,

    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for AnchorState {
    fn default() -> Self {
        Self {
            status: AnchorStatus::Draft,
            tx_signature: None,
            anchored_hash: None,
            anchored_at: None,
            attempts: 0,
            last_error: None,
        }
    }
}

/// A prescription record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    /// Internal numeric id
    pub id: u64,

    /// Shareable identifier
    pub uid: String,

    pub medicine_name: String,
    pub dosage: String,
    pub frequency: u32,
    pub times: Vec<String>,

    #[serde(default)]
    pub instructions: Option<String>,

    pub patient_name: String,

    /// Issuing pharmacy
    pub pharmacy_id: u64,

    /// QR code image as a data URI
    #[serde(default)]
    pub qr_code: Option<String>,

    /// URL encoded in the QR code
    #[serde(default)]
    pub code_url: Option<String>,

    /// Content digest as hex
    #[serde(default)]
    pub data_hash: Option<String>,

    #[serde(default)]
    pub anchor: AnchorState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    /// Create a draft record from a creation request
    pub fn draft(id: u64, uid: String, pharmacy_id: u64, request: PrescriptionRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            uid,
            medicine_name: request.medicine_name,
            dosage: request.dosage,
            frequency: request.frequency,
            times: request.times,
            instructions: request.instructions,
            patient_name: request.patient_name,
            pharmacy_id,
            qr_code: None,
            code_url: None,
            data_hash: None,
            anchor: AnchorState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The digest-covered fields
    pub fn digest_input(&self) -> DigestInput<'_> {
        DigestInput {
            medicine_name: &self.medicine_name,
            dosage: &self.dosage,
            frequency: self.frequency,
            times: &self.times,
            patient_name: &self.patient_name,
        }
    }

    /// Apply a partial edit
    pub fn apply(&mut self, update: UpdatePrescriptionRequest) {
        if let Some(medicine_name) = update.medicine_name {
            self.medicine_name = medicine_name;
        }
        if let Some(dosage) = update.dosage {
            self.dosage = dosage;
        }
        if let Some(frequency) = update.frequency {
            self.frequency = frequency;
        }
        if let Some(times) = update.times {
            self.times = times;
        }
        if let Some(instructions) = update.instructions {
            self.instructions = Some(instructions);
        }
        if let Some(patient_name) = update.patient_name {
            self.patient_name = patient_name;
        }
        self.updated_at = Utc::now();
    }

    /// Record a fresh digest. Returns whether it still needs a receipt: a
    /// digest the stored receipt already proves stays `anchored`, anything
    /// else becomes `pending`.
    pub fn record_digest(&mut self, data_hash: String) -> bool {
        self.data_hash = Some(data_hash);
        self.anchor.attempts = 0;
        self.anchor.last_error = None;
        if self.is_anchor_current() {
            self.anchor.status = AnchorStatus::Anchored;
            false
        } else {
            self.anchor.status = AnchorStatus::Pending;
            true
        }
    }

    /// Whether the current digest is the one the stored receipt proves
    pub fn is_anchor_current(&self) -> bool {
        self.anchor.tx_signature.is_some()
            && self.anchor.anchored_hash.is_some()
            && self.anchor.anchored_hash == self.data_hash
    }
}

/// Request to create a prescription
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionRequest {
    pub medicine_name: String,
    pub dosage: String,
    pub frequency: u32,
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    pub patient_name: String,
}

/// Request to edit a prescription; absent fields keep their values
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePrescriptionRequest {
    pub medicine_name: Option<String>,
    pub dosage: Option<String>,
    pub frequency: Option<u32>,
    pub times: Option<Vec<String>>,
    pub instructions: Option<String>,
    pub patient_name: Option<String>,
}

/// A unit of pending anchoring work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorJob {
    pub uid: String,

    /// Digest this job anchors
    pub digest: String,

    /// Submissions already tried for this digest
    pub attempt: u32,

    pub enqueued_at: DateTime<Utc>,
}

impl AnchorJob {
    pub fn new(uid: String, digest: String) -> Self {
        Self {
            uid,
            digest,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Next attempt of the same job
    pub fn retry(&self) -> Self {
        Self {
            uid: self.uid.clone(),
            digest: self.digest.clone(),
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
        }
    }
}

/// A prescription saved to a consumer's account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPrescription {
    pub consumer_id: u64,
    pub prescription_uid: String,
    pub saved_at: DateTime<Utc>,
}

/// Issuing pharmacy as shown next to a prescription
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PharmacySummary {
    pub name: Option<String>,
    pub email: String,
}

/// A prescription with its issuing pharmacy
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionDetails {
    #[serde(flatten)]
    pub prescription: Prescription,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmacy: Option<PharmacySummary>,
}

/// Response wrapping a single prescription
#[derive(Debug, Serialize)]
pub struct PrescriptionResponse<T> {
    pub prescription: T,
}

/// Response wrapping a list of prescriptions
#[derive(Debug, Serialize)]
pub struct PrescriptionsResponse<T> {
    pub prescriptions: Vec<T>,
}

/// Request to save a prescription to the caller's account
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePrescriptionRequest {
    pub prescription_uid: String,
}
