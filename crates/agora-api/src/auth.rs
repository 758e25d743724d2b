use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use rand_core::OsRng;
use tracing::{info, warn};
use validator::Validate;

use agora_db::Database;
use agora_gateway::ChatService;
use agora_types::api::{ApiResponse, LoginRequest, RegisterRequest};

use crate::error::{ApiError, ApiJson};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub chat: ChatService,
}

impl AppStateInner {
    pub fn new(chat: ChatService) -> AppState {
        Arc::new(Self {
            db: chat.db().clone(),
            chat,
        })
    }
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(mut req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.name = req.name.trim().to_string();
    req.email = req.email.trim().to_lowercase();
    req.validate()?;

    let password_hash = hash_password(req.password).await?;
    let RegisterRequest { name, email, bio, .. } = req;
    let bio = bio.filter(|bio| !bio.trim().is_empty());
    let user = state
        .db
        .run(move |db| db.create_user(&name, &email, &password_hash, bio.as_deref()))
        .await?;

    info!("Registered user {} ({})", user.id, user.email);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message("user registered", user)),
    ))
}

/// Argon2id hash with a fresh salt. Hashing is CPU-bound, so it runs on the
/// blocking pool.
pub(crate) async fn hash_password(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("hash task failed: {e}")))?
    .map_err(|e| ApiError::Internal(format!("hash failed: {e}")))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("email and password are required".into()));
    }

    let user = state
        .db
        .run(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let stored = user.password_hash.clone();
    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || {
        PasswordHash::new(&stored)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
    })
    .await
    .map_err(|e| ApiError::Internal(format!("verify task failed: {e}")))?
    .map_err(|e| ApiError::Internal(format!("stored hash for user {} is malformed: {e}", user.id)))?;

    if !verified {
        warn!("Failed login for user {}", user.id);
        return Err(ApiError::Unauthorized);
    }

    Ok(Json(ApiResponse::ok_with_message(
        "login successful",
        user.into_profile(),
    )))
}
