//! Prescription Service
//!
//! REST API for issuing prescriptions + background worker that anchors them

use anyhow::{Context, Result};
use ledger_client::{keypair, Ledger, MockLedger, SolanaConfig, SolanaLedger};
use prescription_service::{
    create_router, AnchorWorker, AnchorWorkerConfig, AppState, Config, MemoryStorage,
    QrCodeGenerator, RedisStorage, Storage, StorageBackend, TokenIssuer,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "prescription_service=debug,ledger_client=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Prescription Service");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  API address: {}", config.api_address());
    info!("  Storage: {:?}", config.storage_backend);
    info!("  Mock ledger: {}", config.mock_ledger);
    info!("  Public base URL: {}", config.public_base_url);

    let storage: Arc<dyn Storage> = match config.storage_backend {
        StorageBackend::Redis => Arc::new(
            RedisStorage::new(&config.redis_url)
                .await
                .context("Failed to initialize storage")?,
        ),
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            Arc::new(MemoryStorage::new())
        }
    };

    let ledger: Arc<dyn Ledger> = if config.mock_ledger {
        warn!("Using mock ledger; receipts are not on any real chain");
        Arc::new(MockLedger::new())
    } else {
        let key = config
            .solana_private_key
            .as_deref()
            .context("SOLANA_PRIVATE_KEY is required when MOCK_LEDGER=false")?;
        let keypair = keypair::from_json(key).context("Failed to parse SOLANA_PRIVATE_KEY")?;
        let solana_config = SolanaConfig {
            rpc_url: config.solana_rpc_url.clone(),
            cluster: config.solana_cluster.clone(),
            commitment: config.solana_commitment.clone(),
            confirm_timeout: config.ledger_confirm_timeout(),
            ..SolanaConfig::default()
        };
        Arc::new(SolanaLedger::new(solana_config, keypair))
    };
    info!("Ledger signer: {}", ledger.signer());

    // Create application state
    let state = Arc::new(AppState::new(
        storage.clone(),
        ledger.clone(),
        TokenIssuer::new(
            &config.jwt_secret,
            chrono::Duration::hours(config.jwt_ttl_hours),
        ),
        config.bcrypt_cost,
        QrCodeGenerator::new(config.public_base_url.clone()),
    ));

    // Create router
    let app = create_router(state);

    // Worker configuration
    let worker_config = AnchorWorkerConfig {
        app_id: config.anchor_app_id.clone(),
        max_attempts: config.anchor_max_attempts,
        backoff: Duration::from_secs(config.anchor_backoff_secs),
        max_backoff: Duration::from_secs(config.anchor_max_backoff_secs),
        ..AnchorWorkerConfig::default()
    };
    let worker = AnchorWorker::new(worker_config, storage, ledger);

    // Spawn worker task
    let worker_task = tokio::spawn(async move {
        if let Err(e) = worker.recover().await {
            error!("Failed to recover pending anchor jobs: {:#}", e);
        }
        worker.run().await;
    });

    // Start API server
    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Prescription Service API running on http://{}", addr);

    let api_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {:#}", e);
        }
    });

    tokio::select! {
        _ = api_task => {
            error!("API task terminated unexpectedly");
        }
        _ = worker_task => {
            error!("Anchor worker terminated unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down Prescription Service");

    Ok(())
}
