use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use heron_types::api::{Claims, MessageResponse, SendMessageRequest, SendMessageResponse};

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` of the oldest
    /// message from the previous page to fetch older messages.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let sender = claims.sub;
    let (message_id, created_at) =
        tokio::task::spawn_blocking(move || db.db.send_message(conversation_id, sender, &req.content))
            .await
            .map_err(ApiError::join)??;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message_id,
            created_at,
        }),
    ))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let requester = claims.sub;
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || {
        db.db.list_messages(conversation_id, requester, limit, before)
    })
    .await
    .map_err(ApiError::join)??;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .map(|m| MessageResponse {
            id: m.id,
            conversation_id: m.conversation_id,
            sender_id: m.sender_id,
            content: m.content,
            created_at: m.created_at,
            read: m.read,
        })
        .collect();

    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let reader = claims.sub;
    tokio::task::spawn_blocking(move || db.db.mark_read(conversation_id, reader))
        .await
        .map_err(ApiError::join)??;

    Ok(StatusCode::NO_CONTENT)
}
