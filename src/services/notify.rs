//! Notification producer. Runs inside the transaction of the write that
//! triggers it; callers publish the returned rows once they have committed.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    models::notification::{Notification, NotificationType},
    realtime::{ChangeEvent, EventKind, RealtimeHub, Resource},
    utils::now,
};

async fn username_of(conn: &mut SqliteConnection, id: Uuid) -> Result<String, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT username FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_one(&mut *conn)
        .await
}

async fn insert(
    conn: &mut SqliteConnection,
    recipient_id: Uuid,
    actor_id: Uuid,
    kind: NotificationType,
    post_id: Uuid,
    message: String,
) -> Result<Notification, sqlx::Error> {
    let notification = Notification {
        id: Uuid::new_v4(),
        recipient_id,
        actor_id,
        kind,
        post_id,
        message,
        is_read: false,
        created_at: now(),
    };

    sqlx::query(
        r#"
        INSERT INTO notifications (id, recipient_id, actor_id, type, post_id, message, is_read, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
        "#,
    )
    .bind(notification.id)
    .bind(notification.recipient_id)
    .bind(notification.actor_id)
    .bind(notification.kind)
    .bind(notification.post_id)
    .bind(&notification.message)
    .bind(notification.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(notification)
}

/// Like/comment notification for the post owner. Silent when the actor owns the post.
pub async fn notify_post_owner(
    conn: &mut SqliteConnection,
    kind: NotificationType,
    post_id: Uuid,
    post_owner: Uuid,
    actor: Uuid,
) -> Result<Option<Notification>, sqlx::Error> {
    if post_owner == actor {
        return Ok(None);
    }

    let actor_name = username_of(conn, actor).await?;
    let notification = insert(
        conn,
        post_owner,
        actor,
        kind,
        post_id,
        kind.message(&actor_name),
    )
    .await?;

    Ok(Some(notification))
}

/// `new_post` notification for every profile except the author.
pub async fn notify_new_post(
    conn: &mut SqliteConnection,
    post_id: Uuid,
    author: Uuid,
) -> Result<Vec<Notification>, sqlx::Error> {
    let actor_name = username_of(conn, author).await?;
    let recipients = sqlx::query_scalar::<_, Uuid>("SELECT id FROM profiles WHERE id <> $1")
        .bind(author)
        .fetch_all(&mut *conn)
        .await?;

    let message = NotificationType::NewPost.message(&actor_name);
    let mut created = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        created.push(
            insert(
                conn,
                recipient,
                author,
                NotificationType::NewPost,
                post_id,
                message.clone(),
            )
            .await?,
        );
    }

    Ok(created)
}

/// Pushes committed notifications to their recipients' live subscriptions.
pub fn publish(hub: &RealtimeHub, notifications: &[Notification]) {
    for notification in notifications {
        match serde_json::to_value(notification) {
            Ok(record) => {
                hub.publish(
                    ChangeEvent::new(Resource::Notifications, EventKind::Insert, record)
                        .for_recipient(notification.recipient_id),
                );
            }
            Err(e) => tracing::warn!("Failed to serialize notification {}: {}", notification.id, e),
        }
    }
}
