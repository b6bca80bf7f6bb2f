use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    db,
    error::AppError,
    extract::{AppJson, AppPath},
    models::{
        comment::{CommentResponse, CommentRow, CreateCommentRequest},
        notification::NotificationType,
    },
    realtime::{EventKind, RealtimeHub, Resource},
    services::notify,
    utils::{jwt::AuthContext, now, text::normalize_content},
};

const MAX_COMMENT_CHARS: usize = 1000;

#[derive(Debug, Serialize)]
pub struct LikeState {
    pub post_id: Uuid,
    pub liked: bool,
    pub likes_count: i64,
}

#[derive(Debug, Serialize)]
struct LikeEvent {
    post_id: Uuid,
    user_id: Uuid,
    likes_count: i64,
}

async fn post_owner(conn: &mut SqliteConnection, post_id: Uuid) -> Result<Uuid, AppError> {
    sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("Post not found".to_string()))
}

/// Toggle Like on a post.
///
/// Removes the caller's like if there is one, otherwise adds it. The insert
/// is `ON CONFLICT DO NOTHING`, so two racing toggles can never produce two
/// rows for the same (post, user) pair.
pub async fn toggle_like(
    State(pool): State<SqlitePool>,
    State(hub): State<RealtimeHub>,
    Extension(auth): Extension<AuthContext>,
    AppPath(post_id): AppPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = auth.identity_id;

    let mut tx = db::begin_write(&pool).await?;

    let owner = post_owner(&mut *tx, post_id).await?;

    // 1. Unlike if already liked
    let removed = sqlx::query("DELETE FROM likes WHERE post_id = $1 AND user_id = $2")
        .bind(post_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let mut notification = None;
    let liked = if removed > 0 {
        sqlx::query("UPDATE posts SET likes_count = MAX(0, likes_count - 1) WHERE id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        false
    } else {
        // 2. Like
        let inserted = sqlx::query(
            r#"
            INSERT INTO likes (post_id, user_id, created_at) VALUES ($1, $2, $3)
            ON CONFLICT (post_id, user_id) DO NOTHING
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .bind(now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            sqlx::query("UPDATE posts SET likes_count = likes_count + 1 WHERE id = $1")
                .bind(post_id)
                .execute(&mut *tx)
                .await?;

            notification = notify::notify_post_owner(
                &mut *tx,
                NotificationType::Like,
                post_id,
                owner,
                user_id,
            )
            .await?;
        }
        true
    };

    let likes_count = sqlx::query_scalar::<_, i64>("SELECT likes_count FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    let event = LikeEvent {
        post_id,
        user_id,
        likes_count,
    };
    let kind = if liked { EventKind::Insert } else { EventKind::Delete };
    hub.publish_record(Resource::Likes, kind, &event);
    notify::publish(&hub, notification.as_slice());

    Ok(Json(LikeState {
        post_id,
        liked,
        likes_count,
    }))
}

/// Create a new comment.
pub async fn create_comment(
    State(pool): State<SqlitePool>,
    State(hub): State<RealtimeHub>,
    Extension(auth): Extension<AuthContext>,
    AppPath(post_id): AppPath<Uuid>,
    AppJson(payload): AppJson<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let content = normalize_content(&payload.content, "Comment", MAX_COMMENT_CHARS)?;
    let user_id = auth.identity_id;
    let comment_id = Uuid::new_v4();

    let mut tx = db::begin_write(&pool).await?;

    let owner = post_owner(&mut *tx, post_id).await?;

    // 1. Insert Comment
    sqlx::query(
        "INSERT INTO comments (id, post_id, user_id, content, created_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(comment_id)
    .bind(post_id)
    .bind(user_id)
    .bind(&content)
    .bind(now())
    .execute(&mut *tx)
    .await?;

    // 2. Update Post Count
    sqlx::query("UPDATE posts SET comments_count = comments_count + 1 WHERE id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

    // 3. Tell the post owner
    let notification =
        notify::notify_post_owner(&mut *tx, NotificationType::Comment, post_id, owner, user_id)
            .await?;

    let comment: CommentResponse = sqlx::query_as::<_, CommentRow>(
        r#"
        SELECT c.id, c.post_id, c.user_id, c.content, c.created_at, pr.username, pr.avatar_url
        FROM comments c
        JOIN profiles pr ON pr.id = c.user_id
        WHERE c.id = $1
        "#,
    )
    .bind(comment_id)
    .fetch_one(&mut *tx)
    .await?
    .into();

    tx.commit().await?;

    hub.publish_record(Resource::Comments, EventKind::Insert, &comment);
    notify::publish(&hub, notification.as_slice());

    Ok((StatusCode::CREATED, Json(comment)))
}

/// List all comments for a post, oldest first.
pub async fn list_comments(
    State(pool): State<SqlitePool>,
    AppPath(post_id): AppPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_one(&pool)
        .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    let comments: Vec<CommentResponse> = sqlx::query_as::<_, CommentRow>(
        r#"
        SELECT c.id, c.post_id, c.user_id, c.content, c.created_at, pr.username, pr.avatar_url
        FROM comments c
        JOIN profiles pr ON pr.id = c.user_id
        WHERE c.post_id = $1
        ORDER BY c.created_at ASC, c.id ASC
        "#,
    )
    .bind(post_id)
    .fetch_all(&pool)
    .await?
    .into_iter()
    .map(CommentResponse::from)
    .collect();

    Ok(Json(comments))
}

/// Delete one's own comment.
pub async fn delete_comment(
    State(pool): State<SqlitePool>,
    State(hub): State<RealtimeHub>,
    Extension(auth): Extension<AuthContext>,
    AppPath(id): AppPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = db::begin_write(&pool).await?;

    let (post_id, owner) = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT post_id, user_id FROM comments WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Comment not found".to_string()))?;

    if owner != auth.identity_id {
        return Err(AppError::Forbidden(
            "You are not authorized to delete this comment".to_string(),
        ));
    }

    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE posts SET comments_count = MAX(0, comments_count - 1) WHERE id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    hub.publish_record(
        Resource::Comments,
        EventKind::Delete,
        &serde_json::json!({ "id": id, "post_id": post_id }),
    );

    Ok(StatusCode::NO_CONTENT)
}
