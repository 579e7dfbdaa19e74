use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the auth handlers.
/// Canonical definition lives here in heron-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub handle: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub handle: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub handle: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub handle: String,
    pub token: String,
}

// -- Follow graph --

#[derive(Debug, Serialize)]
pub struct FollowCheckResponse {
    pub is_following: bool,
}

/// Minimal profile projection returned by the followers/following lists,
/// ordered most-recent-first.
#[derive(Debug, Clone, Serialize)]
pub struct FollowerProfile {
    pub id: Uuid,
    pub display_name: String,
    pub handle: String,
    pub avatar_ref: Option<String>,
    pub followed_at: DateTime<Utc>,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenConversationRequest {
    pub target_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct OpenConversationResponse {
    pub conversation_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub is_group: bool,
    pub participant_ids: Vec<Uuid>,
    pub last_activity_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

// -- Comments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostCommentRequest {
    pub content: String,
    pub parent_id: Option<Uuid>,
}

/// One node of the reply forest returned to callers. `replies` nests
/// arbitrarily deep; both it and the root list are ordered oldest-first.
#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<CommentNode>,
}
