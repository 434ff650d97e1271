//! Accounts, password hashing and bearer tokens

use anyhow::Context;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pharmachain_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::anchoring::with_pharmacy;
use crate::handlers::{ApiError, AppState};
use crate::models::{PrescriptionDetails, Role, User, UserView};
use crate::storage::Storage;

/// Bearer token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: u64,
    pub role: Option<Role>,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks HS256 bearer tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Sign a token for a user
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            id: user.id,
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign token")?;
        Ok(token)
    }

    /// Check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| Error::Unauthenticated(format!("Invalid token: {}", e)))?;
        Ok(data.claims)
    }
}

/// Hash a password on the blocking pool
pub async fn hash_password(password: String, cost: u32) -> Result<String> {
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("Password hashing task failed")?
        .context("Failed to hash password")?;
    Ok(hashed)
}

/// Check a password against a bcrypt hash on the blocking pool
pub async fn verify_password(password: String, hash: String) -> Result<bool> {
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .context("Password verification task failed")?
        .context("Failed to verify password")?;
    Ok(valid)
}

/// The authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: u64,
    pub role: Option<Role>,
}

impl AuthUser {
    pub fn is_pharmacy(&self) -> bool {
        self.role == Some(Role::Pharmacy)
    }

    /// Fail with `Unauthorized` unless the caller is a pharmacy
    pub fn require_pharmacy(&self, action: &str) -> Result<()> {
        if self.is_pharmacy() {
            Ok(())
        } else {
            Err(Error::unauthorized(format!(
                "Only pharmacy accounts can {}",
                action
            )))
        }
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            role: claims.role,
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Unauthenticated("No token provided".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::Unauthenticated("Malformed authorization header".to_string()))?;

        let claims = state.auth.tokens().verify(token.trim())?;
        Ok(claims.into())
    }
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckEmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckEmailResponse {
    pub exists: bool,
    pub has_password: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteProfileRequest {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub pharmacy_name: Option<String>,

    /// Location of an already uploaded licence document
    pub licence_url: Option<String>,
}

/// Token plus the user it was issued for
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserView,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: UserView,
}

/// A consumer as seen by a pharmacy
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientView {
    pub id: u64,
    pub name: Option<String>,
    pub email: String,
    pub avatar: Option<String>,
    pub role: Option<Role>,
    pub created_at: chrono::DateTime<Utc>,
    pub prescriptions: Vec<PrescriptionDetails>,
}

#[derive(Debug, Serialize)]
pub struct PatientResponse {
    pub patient: PatientView,
}

/// Account operations
pub struct AuthService {
    storage: Arc<dyn Storage>,
    tokens: TokenIssuer,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(storage: Arc<dyn Storage>, tokens: TokenIssuer, bcrypt_cost: u32) -> Self {
        Self {
            storage,
            tokens,
            bcrypt_cost,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    fn respond(&self, user: &User) -> Result<AuthResponse> {
        Ok(AuthResponse {
            token: self.tokens.issue(user)?,
            user: UserView::from(user),
        })
    }

    /// Create a password account with an incomplete profile
    pub async fn register(&self, credentials: Credentials) -> Result<AuthResponse> {
        let email = credentials.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::invalid_input("A valid email is required"));
        }
        if credentials.password.is_empty() {
            return Err(Error::invalid_input("Password is required"));
        }

        // Cheap pre-check so a duplicate does not pay for a bcrypt round
        if self.storage.get_user_by_email(email).await?.is_some() {
            return Err(Error::invalid_input("Email already exists"));
        }

        let hashed = hash_password(credentials.password, self.bcrypt_cost).await?;
        let user = self
            .storage
            .create_user(email, Some(hashed))
            .await?
            .ok_or_else(|| Error::invalid_input("Email already exists"))?;

        info!("Registered user {}", user.id);
        self.respond(&user)
    }

    pub async fn login(&self, credentials: Credentials) -> Result<AuthResponse> {
        let user = self
            .storage
            .get_user_by_email(&credentials.email)
            .await?
            .ok_or_else(|| Error::invalid_input("User not found"))?;

        let hash = user
            .password_hash
            .clone()
            .ok_or_else(|| Error::invalid_input("Please login with Google"))?;

        if !verify_password(credentials.password, hash).await? {
            return Err(Error::invalid_input("Invalid password"));
        }

        debug!("User {} logged in", user.id);
        self.respond(&user)
    }

    pub async fn check_email(&self, request: CheckEmailRequest) -> Result<CheckEmailResponse> {
        let user = self.storage.get_user_by_email(&request.email).await?;
        Ok(CheckEmailResponse {
            exists: user.is_some(),
            has_password: user.is_some_and(|u| u.password_hash.is_some()),
        })
    }

    /// Set name and role; issues a token carrying the new role
    pub async fn complete_profile(
        &self,
        caller: AuthUser,
        request: CompleteProfileRequest,
    ) -> Result<AuthResponse> {
        let name = request
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::invalid_input("Name and role are required"))?;
        let role = request
            .role
            .ok_or_else(|| Error::invalid_input("Name and role are required"))?;

        let pharmacy_name = request.pharmacy_name.filter(|n| !n.trim().is_empty());
        if role == Role::Pharmacy && pharmacy_name.is_none() {
            return Err(Error::invalid_input("Pharmacy name is required"));
        }

        let mut user = self
            .storage
            .get_user(caller.id)
            .await?
            .ok_or_else(|| Error::not_found("User not found"))?;

        user.name = Some(name);
        user.role = Some(role);
        user.is_profile_complete = true;
        if role == Role::Pharmacy {
            user.pharmacy_name = pharmacy_name;
            if let Some(licence_url) = request.licence_url {
                user.licence_url = Some(licence_url);
            }
        }

        self.storage.update_user(&user).await?;

        info!("User {} completed profile as {:?}", user.id, role);
        self.respond(&user)
    }

    pub async fn me(&self, caller: AuthUser) -> Result<UserResponse> {
        let user = self
            .storage
            .get_user(caller.id)
            .await?
            .ok_or_else(|| Error::not_found("User not found"))?;
        Ok(UserResponse {
            user: UserView::from(&user),
        })
    }

    /// A consumer with the prescriptions saved to their account
    pub async fn patient(&self, patient_id: u64) -> Result<PatientResponse> {
        let patient = self
            .storage
            .get_user(patient_id)
            .await?
            .filter(|u| u.role == Some(Role::Consumer))
            .ok_or_else(|| Error::not_found("Patient not found"))?;

        let mut prescriptions = Vec::new();
        for saved in self.storage.list_saved(patient.id).await? {
            if let Some(p) = self.storage.get_prescription(&saved.prescription_uid).await? {
                prescriptions.push(with_pharmacy(self.storage.as_ref(), p).await?);
            }
        }

        Ok(PatientResponse {
            patient: PatientView {
                id: patient.id,
                name: patient.name,
                email: patient.email,
                avatar: patient.avatar,
                role: patient.role,
                created_at: patient.created_at,
                prescriptions,
            },
        })
    }
}
