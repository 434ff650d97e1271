//! Prescription endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::{ApiError, AppState};
use crate::auth::AuthUser;
use crate::models::{
    Prescription, PrescriptionDetails, PrescriptionRequest, PrescriptionResponse,
    PrescriptionsResponse, SavePrescriptionRequest, UpdatePrescriptionRequest,
};
use crate::verification::Verification;

/// Issue a prescription
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<PrescriptionRequest>,
) -> Result<Json<PrescriptionResponse<Prescription>>, ApiError> {
    info!("Creating prescription for pharmacy: {}", user.id);

    let prescription = state.anchoring.create(&user, payload).await?;
    Ok(Json(PrescriptionResponse { prescription }))
}

/// Issue a prescription straight into a patient's account
pub async fn create_for_patient_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(patient_id): Path<u64>,
    Json(payload): Json<PrescriptionRequest>,
) -> Result<Json<PrescriptionResponse<Prescription>>, ApiError> {
    info!(
        "Creating prescription for patient {} by pharmacy {}",
        patient_id, user.id
    );

    let prescription = state
        .anchoring
        .create_for_patient(&user, patient_id, payload)
        .await?;
    Ok(Json(PrescriptionResponse { prescription }))
}

/// Prescriptions issued by the caller
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<PrescriptionsResponse<Prescription>>, ApiError> {
    let prescriptions = state.anchoring.list_for_pharmacy(&user).await?;
    Ok(Json(PrescriptionsResponse { prescriptions }))
}

pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Json<PrescriptionResponse<PrescriptionDetails>>, ApiError> {
    let prescription = state.anchoring.get(&uid).await?;
    Ok(Json(PrescriptionResponse { prescription }))
}

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(uid): Path<String>,
    Json(payload): Json<UpdatePrescriptionRequest>,
) -> Result<Json<PrescriptionResponse<Prescription>>, ApiError> {
    let prescription = state.anchoring.update(&user, &uid, payload).await?;
    Ok(Json(PrescriptionResponse { prescription }))
}

/// Re-queue anchoring for a record
pub async fn anchor_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(uid): Path<String>,
) -> Result<(StatusCode, Json<PrescriptionResponse<Prescription>>), ApiError> {
    let prescription = state.anchoring.retry(&user, &uid).await?;
    Ok((StatusCode::ACCEPTED, Json(PrescriptionResponse { prescription })))
}

pub async fn save_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<SavePrescriptionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .anchoring
        .save_for_consumer(&user, &payload.prescription_uid)
        .await?;
    Ok(Json(serde_json::json!({ "message": "Prescription saved" })))
}

pub async fn list_saved_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<PrescriptionsResponse<PrescriptionDetails>>, ApiError> {
    let prescriptions = state.anchoring.list_saved(&user).await?;
    Ok(Json(PrescriptionsResponse { prescriptions }))
}

/// Check a record's receipt against the ledger
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Response, ApiError> {
    match state.verifier.verify(&uid).await? {
        Verification::NotFound => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "verified": false })),
        )
            .into_response()),
        Verification::Checked(response) => Ok(Json(response).into_response()),
    }
}
