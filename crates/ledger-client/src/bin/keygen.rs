//! Signing key utility for the anchoring wallet
//!
//! Commands:
//! - generate: Create a new keypair and print it in SOLANA_PRIVATE_KEY format
//! - balance: Show the signer's balance
//! - airdrop: Request devnet/testnet SOL for the signer

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_client::{
    keypair, Keypair, Ledger, Signer, SolanaConfig, SolanaLedger, LAMPORTS_PER_SOL,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ledger-keygen")]
#[command(about = "Anchoring wallet key generation and funding utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new keypair
    Generate,

    /// Show the balance of a keypair
    Balance {
        /// Solana RPC URL
        #[arg(short, long, default_value = "https://api.devnet.solana.com")]
        rpc_url: String,

        /// Keypair as a JSON byte array (defaults to SOLANA_PRIVATE_KEY)
        #[arg(short, long, env = "SOLANA_PRIVATE_KEY")]
        key: String,
    },

    /// Request an airdrop (devnet/testnet only)
    Airdrop {
        /// Solana RPC URL
        #[arg(short, long, default_value = "https://api.devnet.solana.com")]
        rpc_url: String,

        /// Keypair as a JSON byte array (defaults to SOLANA_PRIVATE_KEY)
        #[arg(short, long, env = "SOLANA_PRIVATE_KEY")]
        key: String,

        /// Amount in SOL
        #[arg(short, long, default_value_t = 1.0)]
        sol: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate => generate(),
        Commands::Balance { rpc_url, key } => balance(rpc_url, &key).await?,
        Commands::Airdrop { rpc_url, key, sol } => airdrop(rpc_url, &key, sol).await?,
    }

    Ok(())
}

fn generate() {
    let keypair = Keypair::new();
    println!("Public Key: {}", keypair.pubkey());
    println!("Private Key (JSON array): {}", keypair::to_json(&keypair));
    println!();
    println!("Set SOLANA_PRIVATE_KEY to the JSON array and fund the address before anchoring.");
}

fn connect(rpc_url: String, key: &str) -> Result<SolanaLedger> {
    let keypair = keypair::from_json(key).context("Failed to parse keypair")?;
    let config = SolanaConfig {
        rpc_url,
        ..SolanaConfig::default()
    };
    Ok(SolanaLedger::new(config, keypair))
}

async fn balance(rpc_url: String, key: &str) -> Result<()> {
    let ledger = connect(rpc_url, key)?;
    let lamports = ledger.balance().await.context("Failed to fetch balance")?;
    println!("Address: {}", ledger.signer());
    println!("Balance: {} SOL", lamports as f64 / LAMPORTS_PER_SOL as f64);
    Ok(())
}

async fn airdrop(rpc_url: String, key: &str, sol: f64) -> Result<()> {
    if sol <= 0.0 {
        anyhow::bail!("Airdrop amount must be positive");
    }
    let ledger = connect(rpc_url, key)?;
    let lamports = (sol * LAMPORTS_PER_SOL as f64) as u64;
    let receipt = ledger
        .request_airdrop(lamports)
        .await
        .context("Airdrop failed")?;
    println!("Airdrop confirmed: {}", receipt);
    println!("{}", ledger.explorer_url(&receipt));
    Ok(())
}
