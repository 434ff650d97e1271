use serde::{Deserialize, Serialize};

/// Payload attached to a ledger transaction as a memo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorMemo {
    /// Application identifier
    pub app: String,
    /// Prescription uid
    pub uid: String,
    /// Content digest as hex
    pub hash: String,
    /// Submission time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl AnchorMemo {
    /// Create a new memo
    pub fn new(
        app: impl Into<String>,
        uid: impl Into<String>,
        hash: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            app: app.into(),
            uid: uid.into(),
            hash: hash.into(),
            timestamp,
        }
    }

    /// Serialize to the bytes carried on-chain
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse memo bytes read back from the ledger
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
