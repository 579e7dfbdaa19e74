use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};

use heron_types::api::{Claims, OpenConversationRequest, OpenConversationResponse};

use crate::auth::AppState;
use crate::error::ApiError;

/// Mutual-follow gated and idempotent: reopening an existing pair returns
/// the same conversation id with 200 rather than an error.
pub async fn open_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let requester = claims.sub;
    let conversation_id =
        tokio::task::spawn_blocking(move || db.db.open_direct_conversation(requester, req.target_id))
            .await
            .map_err(ApiError::join)??;

    Ok(Json(OpenConversationResponse { conversation_id }))
}

pub async fn inbox(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user = claims.sub;
    let conversations =
        tokio::task::spawn_blocking(move || db.db.list_conversations_for_user(user))
            .await
            .map_err(ApiError::join)??;

    Ok(Json(conversations))
}
