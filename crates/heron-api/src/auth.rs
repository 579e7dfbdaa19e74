use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use heron_db::Database;
use heron_types::SocialError;
use heron_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.handle.len() < 3 || req.handle.len() > 32 {
        return Err(SocialError::Validation("handle must be 3-32 characters".into()).into());
    }
    if req.display_name.is_empty() || req.display_name.len() > 64 {
        return Err(
            SocialError::Validation("display name must be 1-64 characters".into()).into(),
        );
    }
    if req.password.len() < 8 {
        return Err(
            SocialError::Validation("password must be at least 8 characters".into()).into(),
        );
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| SocialError::unavailable_msg("password hashing failed"))?
        .to_string();

    let user_id = Uuid::new_v4();

    // Duplicate handles come back as Conflict from the store's UNIQUE
    // constraint; no separate pre-check needed.
    let db = state.clone();
    let handle = req.handle.clone();
    let display_name = req.display_name.clone();
    tokio::task::spawn_blocking(move || {
        db.db.create_user(user_id, &handle, &display_name, &password_hash)
    })
    .await
    .map_err(ApiError::join)??;

    let token = create_token(&state.jwt_secret, user_id, &req.handle)
        .map_err(|_| SocialError::unavailable_msg("token creation failed"))?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, token }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let handle = req.handle.clone();
    let user = tokio::task::spawn_blocking(move || db.db.get_user_by_handle(&handle))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, user_id, &user.handle)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id,
        handle: user.handle,
        token,
    }))
}

fn create_token(secret: &str, user_id: Uuid, handle: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        handle: handle.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
