use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationType {
    NewPost,
    Like,
    Comment,
}

impl NotificationType {
    /// Message shown to the recipient, e.g. "alice liked your post".
    pub fn message(&self, actor_username: &str) -> String {
        match self {
            NotificationType::NewPost => format!("{} published a new post", actor_username),
            NotificationType::Like => format!("{} liked your post", actor_username),
            NotificationType::Comment => format!("{} commented on your post", actor_username),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationType::NewPost => "new_post",
            NotificationType::Like => "like",
            NotificationType::Comment => "comment",
        })
    }
}

/// Represents the 'notifications' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub post_id: Uuid,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationListParams {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}
