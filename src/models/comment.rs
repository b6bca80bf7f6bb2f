use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::profile::ProfileSummary;

/// Represents the 'comments' table joined with its author.
#[derive(Debug, Clone, FromRow)]
pub struct CommentRow {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// DTO for displaying a comment with author info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub profile: ProfileSummary,
}

impl From<CommentRow> for CommentResponse {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            user_id: row.user_id,
            content: row.content,
            created_at: row.created_at,
            profile: ProfileSummary {
                id: row.user_id,
                username: row.username,
                avatar_url: row.avatar_url,
            },
        }
    }
}

/// DTO for creating a new comment. Content is trimmed and sanitized by the handler.
#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}
