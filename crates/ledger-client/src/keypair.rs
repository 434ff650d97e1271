//! Signing key in Solana's keypair file format
//!
//! Solana tooling stores a keypair as a JSON array of 64 bytes: the 32-byte
//! secret followed by the 32-byte public key.

pub use solana_keypair::Keypair;

use crate::LedgerError;

/// Parse the 64-byte JSON array format (`[12,34,...]`)
pub fn from_json(json: &str) -> Result<Keypair, LedgerError> {
    let bytes: Vec<u8> = serde_json::from_str(json.trim())
        .map_err(|e| LedgerError::InvalidKey(format!("expected JSON byte array: {}", e)))?;
    if bytes.len() != 64 {
        return Err(LedgerError::InvalidKey(format!(
            "expected 64 bytes, got {}",
            bytes.len()
        )));
    }
    Keypair::try_from(bytes.as_slice()).map_err(|e| LedgerError::InvalidKey(e.to_string()))
}

/// Export in the 64-byte JSON array format
pub fn to_json(keypair: &Keypair) -> String {
    // A Vec<u8> always serializes
    serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap_or_default()
}
