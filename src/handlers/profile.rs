use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, is_unique_violation},
    extract::{AppJson, AppPath, AppQuery},
    handlers::posts::parse_cursor,
    models::{
        post::PostListParams,
        profile::{ProfileResponse, UpdateProfileRequest},
    },
    services::feed,
    utils::{
        html::clean_html,
        jwt::{AuthContext, Viewer},
    },
};

const PROFILE_SELECT: &str = r#"
    SELECT
        pr.id, pr.username, pr.bio, pr.avatar_url, pr.created_at,
        (SELECT COUNT(*) FROM posts p WHERE p.user_id = pr.id) AS posts_count
    FROM profiles pr
"#;

async fn profile_by_id(pool: &SqlitePool, id: Uuid) -> Result<ProfileResponse, AppError> {
    sqlx::query_as::<_, ProfileResponse>(&format!("{PROFILE_SELECT} WHERE pr.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Profile not found".to_string()))
}

async fn profile_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<ProfileResponse, AppError> {
    sqlx::query_as::<_, ProfileResponse>(&format!("{PROFILE_SELECT} WHERE pr.username = $1"))
        .bind(username)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Profile not found".to_string()))
}

/// Get current user's profile and post count.
pub async fn get_me(
    State(pool): State<SqlitePool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(profile_by_id(&pool, auth.identity_id).await?))
}

/// Edit one's own username and/or bio.
pub async fn update_me(
    State(pool): State<SqlitePool>,
    Extension(auth): Extension<AuthContext>,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    if let Some(username) = &payload.username {
        let taken = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM profiles WHERE username = $1 AND id <> $2",
        )
        .bind(username)
        .bind(auth.identity_id)
        .fetch_one(&pool)
        .await?;
        if taken > 0 {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }
    }

    // Some("") clears the bio; None leaves it alone.
    let bio = payload.bio.as_deref().map(|raw| {
        let cleaned = clean_html(raw.trim());
        let cleaned = cleaned.trim().to_string();
        (!cleaned.is_empty()).then_some(cleaned)
    });

    sqlx::query(
        r#"
        UPDATE profiles SET
            username = COALESCE($1, username),
            bio = CASE WHEN $2 THEN $3 ELSE bio END
        WHERE id = $4
        "#,
    )
    .bind(&payload.username)
    .bind(bio.is_some())
    .bind(bio.flatten())
    .bind(auth.identity_id)
    .execute(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Username already taken".to_string())
        } else {
            tracing::error!("Failed to update profile {}: {:?}", auth.identity_id, e);
            AppError::from(e)
        }
    })?;

    Ok(Json(profile_by_id(&pool, auth.identity_id).await?))
}

/// Public profile page.
pub async fn get_profile(
    State(pool): State<SqlitePool>,
    AppPath(username): AppPath<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(profile_by_username(&pool, &username).await?))
}

/// Posts authored by one profile, newest first, same paging as the feed.
pub async fn list_user_posts(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    viewer: Viewer,
    AppPath(username): AppPath<String>,
    AppQuery(params): AppQuery<PostListParams>,
) -> Result<impl IntoResponse, AppError> {
    let author = profile_by_username(&pool, &username).await?;
    let cursor = parse_cursor(params.cursor.as_deref())?;
    let limit = feed::page_size(params.limit, config.feed_page_size);

    let page = feed::fetch_page(&pool, viewer.identity_id(), Some(author.id), cursor, limit).await?;

    Ok(Json(page))
}
