use axum::{Json, extract::State, response::IntoResponse};
use tracing::info;
use validator::Validate;

use agora_types::api::{ApiResponse, UpdateUserRequest};

use crate::auth::{AppState, hash_password};
use crate::error::{ApiError, ApiJson, ApiPath};

pub async fn get_user(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .chat
        .get_user(user_id)
        .await?
        .ok_or(agora_db::Error::NotFound("user"))?;
    Ok(Json(ApiResponse::ok(user)))
}

/// `GET /api/users` and `/api/users/todos`
pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let users = state.db.run(|db| db.list_users()).await?;
    Ok(Json(ApiResponse::ok(users)))
}

/// `PUT /api/users/update`
pub async fn update_user(
    State(state): State<AppState>,
    ApiJson(mut req): ApiJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.name = req.name.trim().to_string();
    req.email = req.email.trim().to_lowercase();
    req.password = req.password.filter(|password| !password.is_empty());
    req.validate()?;

    let password_hash = match req.password {
        Some(password) => Some(hash_password(password).await?),
        None => None,
    };
    let UpdateUserRequest {
        user_id,
        name,
        email,
        bio,
        ..
    } = req;
    let bio = bio.filter(|bio| !bio.trim().is_empty());

    let user = state
        .db
        .run(move |db| {
            db.update_user(
                user_id,
                &name,
                &email,
                bio.as_deref(),
                password_hash.as_deref(),
            )
        })
        .await?;

    info!("Updated profile of user {}", user.id);
    Ok(Json(ApiResponse::ok_with_message("profile updated", user)))
}
