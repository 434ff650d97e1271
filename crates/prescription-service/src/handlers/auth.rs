//! Account endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::{ApiError, AppState};
use crate::auth::{
    AuthResponse, AuthUser, CheckEmailRequest, CheckEmailResponse, CompleteProfileRequest,
    Credentials, PatientResponse, UserResponse,
};

pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Credentials>,
) -> Result<Json<AuthResponse>, ApiError> {
    info!("Registering {}", payload.email);
    Ok(Json(state.auth.register(payload).await?))
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Credentials>,
) -> Result<Json<AuthResponse>, ApiError> {
    Ok(Json(state.auth.login(payload).await?))
}

pub async fn check_email_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckEmailRequest>,
) -> Result<Json<CheckEmailResponse>, ApiError> {
    Ok(Json(state.auth.check_email(payload).await?))
}

pub async fn complete_profile_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CompleteProfileRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    Ok(Json(state.auth.complete_profile(user, payload).await?))
}

pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(state.auth.me(user).await?))
}

pub async fn patient_handler(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(patient_id): Path<u64>,
) -> Result<Json<PatientResponse>, ApiError> {
    Ok(Json(state.auth.patient(patient_id).await?))
}
