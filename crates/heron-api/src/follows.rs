use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use heron_types::api::{Claims, FollowCheckResponse};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn follow(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    tokio::task::spawn_blocking(move || db.db.follow(actor, target_id))
        .await
        .map_err(ApiError::join)??;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    tokio::task::spawn_blocking(move || db.db.unfollow(actor, target_id))
        .await
        .map_err(ApiError::join)??;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn follow_check(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    let is_following = tokio::task::spawn_blocking(move || db.db.is_following(actor, target_id))
        .await
        .map_err(ApiError::join)??;

    Ok(Json(FollowCheckResponse { is_following }))
}

pub async fn list_followers(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let followers = tokio::task::spawn_blocking(move || db.db.list_followers(user_id))
        .await
        .map_err(ApiError::join)??;

    Ok(Json(followers))
}

pub async fn list_following(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let following = tokio::task::spawn_blocking(move || db.db.list_following(user_id))
        .await
        .map_err(ApiError::join)??;

    Ok(Json(following))
}

pub async fn profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user = tokio::task::spawn_blocking(move || db.db.get_profile(user_id))
        .await
        .map_err(ApiError::join)??;

    Ok(Json(user))
}
