//! Prescription Service
//!
//! REST API for issuing prescriptions plus a background worker that anchors
//! each prescription's content digest on the ledger.

pub mod anchoring;
pub mod auth;
pub mod config;
pub mod handlers;
pub mod models;
pub mod qr;
pub mod storage;
pub mod verification;
pub mod worker;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use anchoring::AnchoringService;
pub use auth::{AuthService, AuthUser, TokenIssuer};
pub use config::{Config, StorageBackend};
pub use handlers::AppState;
pub use qr::QrCodeGenerator;
pub use storage::{MemoryStorage, RedisStorage, Storage};
pub use verification::{Verification, Verifier};
pub use worker::{AnchorWorker, AnchorWorkerConfig, JobOutcome};

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    use handlers::{auth, prescriptions};

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/ledger/balance", get(handlers::ledger_balance_handler))
        .route("/api/auth/register", post(auth::register_handler))
        .route("/api/auth/register-email", post(auth::register_handler))
        .route("/api/auth/login", post(auth::login_handler))
        .route("/api/auth/check-email", post(auth::check_email_handler))
        .route(
            "/api/auth/complete-profile",
            post(auth::complete_profile_handler),
        )
        .route("/api/auth/me", get(auth::me_handler))
        .route("/api/auth/patient/{id}", get(auth::patient_handler))
        .route(
            "/api/prescriptions",
            post(prescriptions::create_handler).get(prescriptions::list_handler),
        )
        .route(
            "/api/prescriptions/saved",
            get(prescriptions::list_saved_handler),
        )
        .route("/api/prescriptions/save", post(prescriptions::save_handler))
        .route(
            "/api/prescriptions/for-patient/{patient_id}",
            post(prescriptions::create_for_patient_handler),
        )
        .route(
            "/api/prescriptions/{uid}",
            get(prescriptions::get_handler).put(prescriptions::update_handler),
        )
        .route(
            "/api/prescriptions/{uid}/anchor",
            post(prescriptions::anchor_handler),
        )
        .route(
            "/api/prescriptions/{uid}/verify",
            get(prescriptions::verify_handler),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
