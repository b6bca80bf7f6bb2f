use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::Config,
    db,
    error::AppError,
    extract::{AppJson, AppPath, AppQuery},
    models::post::{CreatePostRequest, FeedCursor, PostListParams},
    realtime::{ChangeEvent, EventKind, RealtimeHub, Resource},
    services::{feed, notify},
    utils::{
        jwt::{AuthContext, Viewer},
        now,
        text::normalize_content,
    },
};

const MAX_POST_CHARS: usize = 5000;

/// Parses the optional `cursor` query parameter.
pub(crate) fn parse_cursor(raw: Option<&str>) -> Result<Option<FeedCursor>, AppError> {
    raw.filter(|c| !c.is_empty())
        .map(|c| c.parse::<FeedCursor>().map_err(AppError::BadRequest))
        .transpose()
}

/// Create a new post.
///
/// Every other profile gets a `new_post` notification, and live feed
/// subscribers receive the joined row so they can prepend it.
pub async fn create_post(
    State(pool): State<SqlitePool>,
    State(hub): State<RealtimeHub>,
    Extension(auth): Extension<AuthContext>,
    AppJson(payload): AppJson<CreatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let content = normalize_content(&payload.content, "Content", MAX_POST_CHARS)?;

    let post_id = Uuid::new_v4();

    let mut tx = db::begin_write(&pool).await?;

    sqlx::query(
        r#"
        INSERT INTO posts (id, user_id, content, image_url, likes_count, comments_count, created_at)
        VALUES ($1, $2, $3, $4, 0, 0, $5)
        "#,
    )
    .bind(post_id)
    .bind(auth.identity_id)
    .bind(&content)
    .bind(&payload.image_url)
    .bind(now())
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create post: {:?}", e);
        AppError::from(e)
    })?;

    let notifications = notify::notify_new_post(&mut *tx, post_id, auth.identity_id).await?;

    tx.commit().await?;

    let post = feed::fetch_post(&pool, post_id, Some(auth.identity_id))
        .await?
        .ok_or_else(|| AppError::InternalServerError("Created post vanished".to_string()))?;

    hub.publish_record(Resource::Posts, EventKind::Insert, &post);
    notify::publish(&hub, &notifications);

    tracing::info!("Post {} created by {}", post_id, auth.identity_id);

    Ok((StatusCode::CREATED, Json(post)))
}

/// List posts, newest first, one window at a time.
pub async fn list_posts(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    viewer: Viewer,
    AppQuery(params): AppQuery<PostListParams>,
) -> Result<impl IntoResponse, AppError> {
    let cursor = parse_cursor(params.cursor.as_deref())?;
    let limit = feed::page_size(params.limit, config.feed_page_size);

    let page = feed::fetch_page(&pool, viewer.identity_id(), None, cursor, limit)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list posts: {:?}", e);
            AppError::from(e)
        })?;

    Ok(Json(page))
}

/// Get a single post by ID.
pub async fn get_post(
    State(pool): State<SqlitePool>,
    viewer: Viewer,
    AppPath(id): AppPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let post = feed::fetch_post(&pool, id, viewer.identity_id())
        .await?
        .ok_or(AppError::NotFound("Post not found".to_string()))?;

    Ok(Json(post))
}

/// Delete a post and everything hanging off it.
/// Requires: Login + Author.
pub async fn delete_post(
    State(pool): State<SqlitePool>,
    State(hub): State<RealtimeHub>,
    Extension(auth): Extension<AuthContext>,
    AppPath(id): AppPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = db::begin_write(&pool).await?;

    // 1. Fetch Post to check ownership
    let owner = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM posts WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Post not found".to_string()))?;

    // 2. Check Permission
    if owner != auth.identity_id {
        return Err(AppError::Forbidden(
            "You are not authorized to delete this post".to_string(),
        ));
    }

    // 3. Dependents first; there is no ON DELETE CASCADE.
    for statement in [
        "DELETE FROM notifications WHERE post_id = $1",
        "DELETE FROM comments WHERE post_id = $1",
        "DELETE FROM likes WHERE post_id = $1",
        "DELETE FROM posts WHERE id = $1",
    ] {
        sqlx::query(statement)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete post {}: {:?}", id, e);
                AppError::from(e)
            })?;
    }

    tx.commit().await?;

    hub.publish(ChangeEvent::new(
        Resource::Posts,
        EventKind::Delete,
        serde_json::json!({ "id": id, "user_id": owner }),
    ));

    tracing::info!("Post {} deleted by {}", id, auth.identity_id);

    Ok(StatusCode::NO_CONTENT)
}
