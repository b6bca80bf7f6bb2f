use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    error::AppError,
    extract::{AppPath, AppQuery},
    models::notification::{Notification, NotificationListParams, UnreadCount},
    realtime::{ChangeEvent, EventKind, RealtimeHub, Resource},
    utils::jwt::AuthContext,
};

const MAX_LISTED: i64 = 100;

/// The caller's notifications, newest first.
pub async fn list_notifications(
    State(pool): State<SqlitePool>,
    Extension(auth): Extension<AuthContext>,
    AppQuery(params): AppQuery<NotificationListParams>,
) -> Result<impl IntoResponse, AppError> {
    let notifications = sqlx::query_as::<_, Notification>(
        r#"
        SELECT id, recipient_id, actor_id, type, post_id, message, is_read, created_at
        FROM notifications
        WHERE recipient_id = $1 AND ($2 = FALSE OR is_read = FALSE)
        ORDER BY created_at DESC, id DESC
        LIMIT $3
        "#,
    )
    .bind(auth.identity_id)
    .bind(params.unread_only)
    .bind(MAX_LISTED)
    .fetch_all(&pool)
    .await?;

    Ok(Json(notifications))
}

pub async fn unread_count(
    State(pool): State<SqlitePool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    let unread = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = FALSE",
    )
    .bind(auth.identity_id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(UnreadCount { unread }))
}

/// Marks one notification as read. Someone else's notification is a 404.
pub async fn mark_read(
    State(pool): State<SqlitePool>,
    State(hub): State<RealtimeHub>,
    Extension(auth): Extension<AuthContext>,
    AppPath(id): AppPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let notification = sqlx::query_as::<_, Notification>(
        r#"
        UPDATE notifications SET is_read = TRUE
        WHERE id = $1 AND recipient_id = $2
        RETURNING id, recipient_id, actor_id, type, post_id, message, is_read, created_at
        "#,
    )
    .bind(id)
    .bind(auth.identity_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Notification not found".to_string()))?;

    match serde_json::to_value(&notification) {
        Ok(record) => {
            hub.publish(
                ChangeEvent::new(Resource::Notifications, EventKind::Update, record)
                    .for_recipient(auth.identity_id),
            );
        }
        Err(e) => tracing::warn!("Skipping notification update event: {}", e),
    }

    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(pool): State<SqlitePool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    let updated = sqlx::query(
        "UPDATE notifications SET is_read = TRUE WHERE recipient_id = $1 AND is_read = FALSE",
    )
    .bind(auth.identity_id)
    .execute(&pool)
    .await?
    .rows_affected();

    Ok(Json(json!({ "updated": updated })))
}
