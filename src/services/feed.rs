//! Feed reads: posts joined with their author, denormalized counts and the
//! per-viewer like flag.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::post::{FeedCursor, FeedPost, FeedPostRow, PostPage};

/// Hard upper bound on one window, whatever the client asks for.
pub const MAX_PAGE_SIZE: i64 = 50;

const FEED_SELECT: &str = r#"
    SELECT
        p.id, p.user_id, p.content, p.image_url, p.created_at,
        p.likes_count, p.comments_count,
        pr.username, pr.avatar_url,
        EXISTS (
            SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = $1
        ) AS user_has_liked
    FROM posts p
    JOIN profiles pr ON pr.id = p.user_id
"#;

/// Clamps a requested window size to `1..=MAX_PAGE_SIZE`.
pub fn page_size(requested: Option<i64>, default: i64) -> i64 {
    requested.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}

/// One window of posts, newest first, strictly after `cursor`.
///
/// `author` restricts the window to one profile's posts. `viewer` drives
/// `user_has_liked`.
pub async fn fetch_page(
    pool: &SqlitePool,
    viewer: Option<Uuid>,
    author: Option<Uuid>,
    cursor: Option<FeedCursor>,
    limit: i64,
) -> Result<PostPage, sqlx::Error> {
    let sql = format!(
        r#"{FEED_SELECT}
        WHERE ($2 IS NULL OR p.user_id = $2)
          AND ($3 IS NULL OR p.created_at < $3 OR (p.created_at = $3 AND p.id < $4))
        ORDER BY p.created_at DESC, p.id DESC
        LIMIT $5
        "#
    );

    // One extra row tells us whether another window exists.
    let mut rows = sqlx::query_as::<_, FeedPostRow>(&sql)
        .bind(viewer)
        .bind(author)
        .bind(cursor.map(|c| c.created_at))
        .bind(cursor.map(|c| c.id))
        .bind(limit + 1)
        .fetch_all(pool)
        .await?;

    let has_more = rows.len() as i64 > limit;
    rows.truncate(limit as usize);

    let posts: Vec<FeedPost> = rows.into_iter().map(FeedPost::from).collect();
    let next_cursor = if has_more {
        posts.last().map(|p| FeedCursor::after(p).to_string())
    } else {
        None
    };

    Ok(PostPage { posts, next_cursor })
}

pub async fn fetch_post(
    pool: &SqlitePool,
    id: Uuid,
    viewer: Option<Uuid>,
) -> Result<Option<FeedPost>, sqlx::Error> {
    let sql = format!("{FEED_SELECT} WHERE p.id = $2");

    let row = sqlx::query_as::<_, FeedPostRow>(&sql)
        .bind(viewer)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(FeedPost::from))
}
