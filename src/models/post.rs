use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::profile::ProfileSummary;

/// Represents a feed row: the 'posts' table joined with its author and
/// annotated for the requesting viewer.
#[derive(Debug, Clone, FromRow)]
pub struct FeedPostRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub likes_count: i64,
    pub comments_count: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub user_has_liked: bool,
}

/// A post as served to clients. Counts are always plain integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPost {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub profile: ProfileSummary,
    pub likes_count: i64,
    pub comments_count: i64,
    /// Whether the requesting identity has liked this post; false for anonymous viewers.
    pub user_has_liked: bool,
}

impl From<FeedPostRow> for FeedPost {
    fn from(row: FeedPostRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            content: row.content,
            image_url: row.image_url,
            created_at: row.created_at,
            profile: ProfileSummary {
                id: row.user_id,
                username: row.username,
                avatar_url: row.avatar_url,
            },
            likes_count: row.likes_count,
            comments_count: row.comments_count,
            user_has_liked: row.user_has_liked,
        }
    }
}

/// DTO for creating a new post.
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePostRequest {
    /// Trimmed and sanitized by the handler; length is checked after that.
    pub content: String,

    #[validate(url(message = "image_url must be an absolute URL"), length(max = 500))]
    pub image_url: Option<String>,
}

/// Query parameters for listing posts.
#[derive(Debug, Deserialize)]
pub struct PostListParams {
    /// Opaque position returned as `next_cursor` by the previous page.
    pub cursor: Option<String>,

    /// Number of items to return (default: configured page size, max: 50).
    pub limit: Option<i64>,
}

/// One window of the feed.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostPage {
    pub posts: Vec<FeedPost>,
    /// Pass back as `cursor` to get the next window; null on the last page.
    pub next_cursor: Option<String>,
}

/// Keyset position in the `(created_at DESC, id DESC)` ordering.
///
/// Encoded as `{created_at RFC 3339, microseconds}_{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl FeedCursor {
    pub fn after(post: &FeedPost) -> Self {
        Self {
            created_at: post.created_at,
            id: post.id,
        }
    }
}

impl fmt::Display for FeedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.id.simple()
        )
    }
}

impl FromStr for FeedCursor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (time, id) = s
            .rsplit_once('_')
            .ok_or_else(|| "malformed cursor".to_string())?;
        let created_at = DateTime::parse_from_rfc3339(time)
            .map_err(|_| "malformed cursor timestamp".to_string())?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id).map_err(|_| "malformed cursor id".to_string())?;
        Ok(Self { created_at, id })
    }
}
