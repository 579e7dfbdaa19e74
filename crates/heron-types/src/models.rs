use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub handle: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    /// Denormalized caches of the edge counts; maintained in the same
    /// transaction as every edge change, never authoritative on their own.
    pub followers_count: i64,
    pub following_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Directed edge: `follower_id` follows `following_id`. A following B says
/// nothing about B following A.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowEdge {
    pub follower_id: Uuid,
    pub following_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub is_group: bool,
    pub creator_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Bumped on every send; drives inbox ordering.
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Flat comment row as stored; input to the thread builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub story_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
