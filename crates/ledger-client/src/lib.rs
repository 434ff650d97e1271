//! Ledger Client
//!
//! Anchors small opaque payloads on the Solana ledger as Memo program
//! instructions and later checks whether they are still confirmed.
//!
//! ## Components
//!
//! - `keypair`: Solana's 64-byte JSON keypair format
//! - `transaction`: memo instruction and signed transaction construction
//! - `solana`: RPC-backed ledger that submits and confirms memo transactions
//! - `mock`: in-process ledger for development and tests
//!
//! Callers talk to the [`Ledger`] trait. Submission and confirmation never
//! return errors to the caller: failures come back as [`SubmitOutcome::Failed`]
//! or [`Confirmation::Unknown`] so that ledger trouble cannot block the
//! caller's own persistence.

pub mod error;
pub mod keypair;
pub mod mock;
pub mod solana;
pub mod transaction;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::LedgerError;
pub use keypair::Keypair;
pub use solana_signer::Signer;
pub use mock::MockLedger;
pub use solana::{SolanaConfig, SolanaLedger};

/// Lamports in one SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Opaque identifier of a submitted transaction (base58 signature)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Receipt(pub String);

impl Receipt {
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a submission attempt
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The transaction reached the configured commitment
    Confirmed(Receipt),
    /// The signing account cannot pay fees; nothing was sent
    InsufficientFunds { balance: u64 },
    /// Network, signing or on-chain failure
    Failed(LedgerError),
}

impl SubmitOutcome {
    /// The receipt, if the submission succeeded
    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            SubmitOutcome::Confirmed(receipt) => Some(receipt),
            _ => None,
        }
    }
}

/// Confirmation status of a previously submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Found on the ledger at the configured commitment
    Confirmed,
    /// The ledger answered and does not know the transaction
    NotFound,
    /// The query itself failed
    Unknown,
}

impl Confirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed)
    }
}

/// A ledger that can carry memo payloads
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Base58 public key of the signing account
    fn signer(&self) -> String;

    /// Public explorer link for a receipt
    fn explorer_url(&self, receipt: &Receipt) -> String;

    /// Balance of the signing account in lamports
    async fn balance(&self) -> Result<u64, LedgerError>;

    /// Submit a memo and wait until it is confirmed
    async fn submit(&self, memo: &[u8]) -> SubmitOutcome;

    /// Look up a previously submitted transaction
    async fn confirmation(&self, receipt: &Receipt) -> Confirmation;

    /// Two-valued form of [`Ledger::confirmation`]; query failures read as `false`
    async fn confirm(&self, receipt: &Receipt) -> bool {
        self.confirmation(receipt).await.is_confirmed()
    }
}

/// Solana explorer link for a transaction signature
pub fn explorer_url(cluster: &str, signature: &str) -> String {
    if cluster == "mainnet-beta" {
        format!("https://explorer.solana.com/tx/{}", signature)
    } else {
        format!(
            "https://explorer.solana.com/tx/{}?cluster={}",
            signature, cluster
        )
    }
}
