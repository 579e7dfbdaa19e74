use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use heron_types::api::{Claims, PostCommentRequest};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn post_comment(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PostCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let author = claims.sub;
    let (id, created_at) = tokio::task::spawn_blocking(move || {
        db.db.insert_comment(story_id, author, &req.content, req.parent_id)
    })
    .await
    .map_err(ApiError::join)??;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": id, "created_at": created_at })),
    ))
}

/// Returns the story's discussion as a nested reply forest. The flat rows
/// come straight off a read snapshot; threading happens in memory on every
/// request.
pub async fn story_comments(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.comments_for_story(story_id))
        .await
        .map_err(ApiError::join)??;

    Ok(Json(heron_threads::build_forest(rows)))
}
