//! API handlers for the prescription service

pub mod auth;
pub mod prescriptions;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ledger_client::{Ledger, LAMPORTS_PER_SOL};
use pharmachain_common::Error;
use std::sync::Arc;
use tracing::{error, warn};

use crate::anchoring::AnchoringService;
use crate::auth::{AuthService, TokenIssuer};
use crate::qr::QrCodeGenerator;
use crate::storage::Storage;
use crate::verification::Verifier;

/// Shared application state
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub ledger: Arc<dyn Ledger>,
    pub auth: AuthService,
    pub anchoring: AnchoringService,
    pub verifier: Verifier,
}

impl AppState {
    /// Wire the services around one store and one ledger
    pub fn new(
        storage: Arc<dyn Storage>,
        ledger: Arc<dyn Ledger>,
        tokens: TokenIssuer,
        bcrypt_cost: u32,
        codes: QrCodeGenerator,
    ) -> Self {
        Self {
            auth: AuthService::new(storage.clone(), tokens, bcrypt_cost),
            anchoring: AnchoringService::new(storage.clone(), codes),
            verifier: Verifier::new(storage.clone(), ledger.clone()),
            storage,
            ledger,
        }
    }
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::CodeGeneration(_) | Error::JsonSerialization(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Client errors carry their bare message; the rest are logged in full
        let message = match err {
            Error::InvalidInput(msg)
            | Error::Unauthenticated(msg)
            | Error::Unauthorized(msg)
            | Error::NotFound(msg)
            | Error::Conflict(msg) => msg,
            other => {
                error!("Request failed: {:#}", other);
                other.to_string()
            }
        };

        ApiError { status, message }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err).into()
    }
}

/// Health check
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.storage.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "service": "prescription-service"
            })),
        ),
        Err(e) => {
            warn!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "service": "prescription-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Signer address and balance
pub async fn ledger_balance_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let lamports = state
        .ledger
        .balance()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(serde_json::json!({
        "address": state.ledger.signer(),
        "lamports": lamports,
        "balance": lamports as f64 / LAMPORTS_PER_SOL as f64
    })))
}
