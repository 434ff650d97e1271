//! Content digest of a prescription
//!
//! The digest is SHA-256 over a canonical JSON rendering of the fields that
//! make up a prescription's meaning, with the record's `uid` mixed in so that
//! two prescriptions with identical content never share a digest.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::{Error, Result};

/// A SHA-256 content digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    /// Get the inner bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to lowercase hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hexadecimal string
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_hex()
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// The digest-covered fields of a prescription, borrowed from the caller
#[derive(Debug, Clone, Copy)]
pub struct DigestInput<'a> {
    pub medicine_name: &'a str,
    pub dosage: &'a str,
    pub frequency: u32,
    pub times: &'a [String],
    pub patient_name: &'a str,
}

/// Canonical serialization. Field order here is the wire order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalContent<'a> {
    medicine_name: &'a str,
    dosage: &'a str,
    frequency: u32,
    times: &'a [String],
    patient_name: &'a str,
    uid: &'a str,
}

/// Check that the fields are well-formed enough to be digested
pub fn validate(input: &DigestInput<'_>, uid: &str) -> Result<()> {
    if uid.trim().is_empty() {
        return Err(Error::invalid_input("uid must not be empty"));
    }
    if input.medicine_name.trim().is_empty() {
        return Err(Error::invalid_input("medicineName must not be empty"));
    }
    if input.dosage.trim().is_empty() {
        return Err(Error::invalid_input("dosage must not be empty"));
    }
    if input.patient_name.trim().is_empty() {
        return Err(Error::invalid_input("patientName must not be empty"));
    }
    if input.frequency == 0 {
        return Err(Error::invalid_input("frequency must be at least 1"));
    }
    for time in input.times {
        NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| {
            Error::invalid_input(format!("invalid schedule time '{}', expected HH:MM", time))
        })?;
    }
    Ok(())
}

/// Compute the content digest of a prescription
pub fn digest(input: &DigestInput<'_>, uid: &str) -> Result<ContentDigest> {
    validate(input, uid)?;

    let canonical = CanonicalContent {
        medicine_name: input.medicine_name,
        dosage: input.dosage,
        frequency: input.frequency,
        times: input.times,
        patient_name: input.patient_name,
        uid,
    };
    let bytes = serde_json::to_vec(&canonical)?;

    let hash = Sha256::digest(&bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hash);
    Ok(ContentDigest(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times() -> Vec<String> {
        vec!["08:00".to_string(), "14:00".to_string(), "20:00".to_string()]
    }

    fn amoxicillin(times: &[String]) -> DigestInput<'_> {
        DigestInput {
            medicine_name: "Amoxicillin",
            dosage: "500mg",
            frequency: 3,
            times,
            patient_name: "Jane Doe",
        }
    }

    #[test]
    fn test_known_vector() {
        let times = times();
        let digest = digest(&amoxicillin(&times), "rx-0001").unwrap();
        assert_eq!(
            digest.to_hex(),
            "858078c3e2069a37a869abd1c1da6fef9d0fffa80f47155f30fb3073c53272a2"
        );
    }

    #[test]
    fn test_uid_changes_digest() {
        let times = times();
        let input = amoxicillin(&times);
        let a = digest(&input, "rx-0001").unwrap();
        let b = digest(&input, "rx-0002").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_is_idempotent() {
        let times = times();
        let input = amoxicillin(&times);
        let first = digest(&input, "rx-0001").unwrap();
        for _ in 0..5 {
            assert_eq!(digest(&input, "rx-0001").unwrap(), first);
        }
    }

    #[test]
    fn test_dosage_changes_digest() {
        let times = times();
        let mut input = amoxicillin(&times);
        let before = digest(&input, "rx-0001").unwrap();
        input.dosage = "250mg";
        let after = digest(&input, "rx-0001").unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_rejects_malformed_input() {
        let times = times();

        assert!(matches!(
            digest(&amoxicillin(&times), ""),
            Err(Error::InvalidInput(_))
        ));

        let mut input = amoxicillin(&times);
        input.frequency = 0;
        assert!(matches!(digest(&input, "rx"), Err(Error::InvalidInput(_))));

        let mut input = amoxicillin(&times);
        input.medicine_name = "  ";
        assert!(matches!(digest(&input, "rx"), Err(Error::InvalidInput(_))));

        let bad_times = vec!["8 o'clock".to_string()];
        let input = amoxicillin(&bad_times);
        assert!(matches!(digest(&input, "rx"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_digest_hex_roundtrip_through_serde() {
        let times = times();
        let digest = digest(&amoxicillin(&times), "rx-0001").unwrap();
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", digest.to_hex()));
        let decoded: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, digest);
    }
}
