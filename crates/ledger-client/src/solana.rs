//! Solana ledger
//!
//! Submits memo transactions through the Solana RPC client and polls
//! signature status until the configured commitment is reached.

use async_trait::async_trait;
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use solana_signature::Signature;
use solana_signer::Signer;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::transaction::memo_transaction;
use crate::{Confirmation, Ledger, LedgerError, Receipt, SubmitOutcome, LAMPORTS_PER_SOL};

/// Connection settings for a Solana cluster
#[derive(Debug, Clone)]
pub struct SolanaConfig {
    /// RPC endpoint
    pub rpc_url: String,

    /// Cluster name used for explorer links (devnet, testnet, mainnet-beta)
    pub cluster: String,

    /// Commitment level to wait for (processed, confirmed, finalized)
    pub commitment: String,

    /// Upper bound on waiting for a submitted transaction
    pub confirm_timeout: Duration,

    /// Delay between signature status polls
    pub poll_interval: Duration,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            cluster: "devnet".to_string(),
            commitment: "confirmed".to_string(),
            confirm_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

fn commitment_config(level: &str) -> CommitmentConfig {
    match level {
        "processed" => CommitmentConfig::processed(),
        "finalized" => CommitmentConfig::finalized(),
        _ => CommitmentConfig::confirmed(),
    }
}

/// Commitment used when checking an existing receipt. A `processed`
/// transaction can still be dropped by a fork, so lookups never go below
/// `confirmed`.
fn lookup_commitment(level: &str) -> CommitmentConfig {
    match level {
        "finalized" => CommitmentConfig::finalized(),
        _ => CommitmentConfig::confirmed(),
    }
}

fn transport(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Transport(e.to_string())
}

/// Ledger backed by a Solana RPC node
pub struct SolanaLedger {
    config: SolanaConfig,
    keypair: Keypair,
    client: RpcClient,
}

impl SolanaLedger {
    /// Create a new client. The keypair is held for the lifetime of the ledger.
    pub fn new(config: SolanaConfig, keypair: Keypair) -> Self {
        info!(
            "Solana ledger on {} ({}), signer {}",
            config.cluster,
            config.rpc_url,
            keypair.pubkey()
        );
        let client = RpcClient::new_with_commitment(
            config.rpc_url.clone(),
            commitment_config(&config.commitment),
        );
        Self {
            config,
            keypair,
            client,
        }
    }

    pub fn config(&self) -> &SolanaConfig {
        &self.config
    }

    async fn poll_signature_status(&self, signature: &Signature) -> Result<(), LedgerError> {
        let commitment = commitment_config(&self.config.commitment);

        loop {
            let status = self
                .client
                .get_signature_status_with_commitment(signature, commitment)
                .await
                .map_err(transport)?;

            match status {
                Some(Ok(())) => return Ok(()),
                Some(Err(e)) => return Err(LedgerError::TransactionFailed(e.to_string())),
                None => debug!("{} not yet at {}", signature, self.config.commitment),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn wait_for_confirmation(&self, signature: &Signature) -> Result<(), LedgerError> {
        tokio::time::timeout(
            self.config.confirm_timeout,
            self.poll_signature_status(signature),
        )
        .await
        .map_err(|_| LedgerError::ConfirmationTimeout {
            signature: signature.to_string(),
            secs: self.config.confirm_timeout.as_secs(),
        })?
    }

    async fn try_submit(&self, memo: &[u8]) -> Result<Receipt, LedgerError> {
        let balance = self.balance().await?;
        debug!(
            "Signer balance: {} SOL",
            balance as f64 / LAMPORTS_PER_SOL as f64
        );
        if balance == 0 {
            return Err(LedgerError::InsufficientFunds { balance });
        }

        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(transport)?;
        let tx = memo_transaction(&self.keypair, blockhash, memo)?;

        let signature = self.client.send_transaction(&tx).await.map_err(transport)?;
        if signature != tx.signatures[0] {
            warn!(
                "RPC returned signature {} for transaction {}",
                signature, tx.signatures[0]
            );
        }

        info!("Waiting for confirmation of {}", signature);
        self.wait_for_confirmation(&signature).await?;

        Ok(Receipt::new(signature.to_string()))
    }

    /// Request a devnet/testnet airdrop to the signer
    pub async fn request_airdrop(&self, lamports: u64) -> Result<Receipt, LedgerError> {
        let signature = self
            .client
            .request_airdrop(&self.keypair.pubkey(), lamports)
            .await
            .map_err(transport)?;
        self.wait_for_confirmation(&signature).await?;
        Ok(Receipt::new(signature.to_string()))
    }
}

#[async_trait]
impl Ledger for SolanaLedger {
    fn signer(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    fn explorer_url(&self, receipt: &Receipt) -> String {
        crate::explorer_url(&self.config.cluster, receipt.as_str())
    }

    async fn balance(&self) -> Result<u64, LedgerError> {
        self.client
            .get_balance(&self.keypair.pubkey())
            .await
            .map_err(transport)
    }

    async fn submit(&self, memo: &[u8]) -> SubmitOutcome {
        match self.try_submit(memo).await {
            Ok(receipt) => {
                info!("Solana tx confirmed: {}", receipt);
                SubmitOutcome::Confirmed(receipt)
            }
            Err(LedgerError::InsufficientFunds { balance }) => {
                warn!(
                    "Signer {} has no SOL, skipping submission",
                    self.keypair.pubkey()
                );
                SubmitOutcome::InsufficientFunds { balance }
            }
            Err(e) => {
                warn!("Solana submission failed: {}", e);
                SubmitOutcome::Failed(e)
            }
        }
    }

    async fn confirmation(&self, receipt: &Receipt) -> Confirmation {
        let signature = match Signature::from_str(receipt.as_str()) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("Receipt {} is not a transaction signature: {}", receipt, e);
                return Confirmation::NotFound;
            }
        };

        let statuses = match self
            .client
            .get_signature_statuses_with_history(&[signature])
            .await
        {
            Ok(response) => response.value,
            Err(e) => {
                warn!("Failed to look up transaction {}: {}", receipt, e);
                return Confirmation::Unknown;
            }
        };

        match statuses.into_iter().next().flatten() {
            Some(status) if status.err.is_some() => {
                warn!("Transaction {} failed on-chain", receipt);
                Confirmation::NotFound
            }
            Some(status)
                if status.satisfies_commitment(lookup_commitment(&self.config.commitment)) =>
            {
                Confirmation::Confirmed
            }
            _ => Confirmation::NotFound,
        }
    }
}
