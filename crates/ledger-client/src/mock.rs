//! Mock ledger for development and testing
//!
//! Keeps submitted memos in memory and signs them with a throwaway key so
//! receipts look like real base58 transaction signatures.

use async_trait::async_trait;
use solana_keypair::Keypair;
use solana_signer::Signer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{Confirmation, Ledger, LedgerError, Receipt, SubmitOutcome, LAMPORTS_PER_SOL};

/// In-process ledger
pub struct MockLedger {
    keypair: Keypair,

    /// Signer balance in lamports
    balance: AtomicU64,

    /// When set, every call behaves like a network failure
    unreachable: AtomicBool,

    /// Receipt -> memo bytes
    transactions: Mutex<HashMap<String, Vec<u8>>>,

    /// Bumped per submission so identical memos get distinct receipts
    nonce: AtomicU64,
}

impl MockLedger {
    /// Create a funded mock ledger (1 SOL)
    pub fn new() -> Self {
        Self::with_balance(LAMPORTS_PER_SOL)
    }

    /// Create a mock ledger with the given signer balance
    pub fn with_balance(lamports: u64) -> Self {
        Self {
            keypair: Keypair::new(),
            balance: AtomicU64::new(lamports),
            unreachable: AtomicBool::new(false),
            transactions: Mutex::new(HashMap::new()),
            nonce: AtomicU64::new(0),
        }
    }

    pub fn set_balance(&self, lamports: u64) {
        self.balance.store(lamports, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Memo stored under a receipt
    pub async fn memo(&self, receipt: &Receipt) -> Option<Vec<u8>> {
        self.transactions.lock().await.get(receipt.as_str()).cloned()
    }

    /// Drop a transaction, as if it had been pruned from the ledger
    pub async fn forget(&self, receipt: &Receipt) -> bool {
        self.transactions
            .lock()
            .await
            .remove(receipt.as_str())
            .is_some()
    }

    /// Number of accepted submissions
    pub async fn submission_count(&self) -> usize {
        self.transactions.lock().await.len()
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    fn signer(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    fn explorer_url(&self, receipt: &Receipt) -> String {
        crate::explorer_url("devnet", receipt.as_str())
    }

    async fn balance(&self) -> Result<u64, LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unreachable);
        }
        Ok(self.balance.load(Ordering::SeqCst))
    }

    async fn submit(&self, memo: &[u8]) -> SubmitOutcome {
        let balance = match self.balance().await {
            Ok(balance) => balance,
            Err(e) => return SubmitOutcome::Failed(e),
        };
        if balance == 0 {
            debug!("Mock ledger: insufficient funds");
            return SubmitOutcome::InsufficientFunds { balance };
        }

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut signed = memo.to_vec();
        signed.extend_from_slice(&nonce.to_le_bytes());
        let signature = self.keypair.sign_message(&signed).to_string();

        self.transactions
            .lock()
            .await
            .insert(signature.clone(), memo.to_vec());

        debug!("Mock ledger: submit() -> {}", signature);
        SubmitOutcome::Confirmed(Receipt::new(signature))
    }

    async fn confirmation(&self, receipt: &Receipt) -> Confirmation {
        if self.unreachable.load(Ordering::SeqCst) {
            return Confirmation::Unknown;
        }
        if self.transactions.lock().await.contains_key(receipt.as_str()) {
            Confirmation::Confirmed
        } else {
            Confirmation::NotFound
        }
    }
}
