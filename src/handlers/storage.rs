use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppError,
    extract::AppPath,
    models::object::{ObjectMeta, UploadResponse},
    storage::{ALLOWED_CONTENT_TYPES, Bucket, ObjectKey, ObjectStore, extension_for},
    utils::{jwt::AuthContext, now},
};

/// Media type of the upload without parameters, restricted to images.
fn upload_content_type(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Content-Type header is required".to_string()))?;

    let essence = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if !ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unsupported content type '{}'; expected one of {}",
            essence,
            ALLOWED_CONTENT_TYPES.join(", ")
        )));
    }

    Ok(essence)
}

fn parse_key(bucket: &str, path: &str) -> Result<ObjectKey, AppError> {
    let bucket: Bucket = bucket.parse()?;
    Ok(ObjectKey::new(bucket, path)?)
}

/// Writes the blob and upserts its metadata row.
///
/// The first path segment must be the uploader's identity id. Uploading to
/// an existing key replaces the bytes in place, so URLs stay valid.
pub(crate) async fn store_object(
    pool: &SqlitePool,
    objects: &ObjectStore,
    config: &Config,
    owner: Uuid,
    key: &ObjectKey,
    content_type: String,
    body: Bytes,
) -> Result<UploadResponse, AppError> {
    if key.owner_segment() != owner.to_string() {
        return Err(AppError::Forbidden(
            "Objects can only be written under your own id".to_string(),
        ));
    }
    if body.is_empty() {
        return Err(AppError::BadRequest("Upload body is empty".to_string()));
    }

    let written = objects.put(key, body).await.map_err(|e| {
        tracing::error!("Failed to write object {}/{}: {}", key.bucket(), key.path(), e);
        AppError::from(e)
    })?;

    sqlx::query(
        r#"
        INSERT INTO objects (bucket, path, owner_id, content_type, size, sha256, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (bucket, path) DO UPDATE SET
            content_type = excluded.content_type,
            size = excluded.size,
            sha256 = excluded.sha256,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key.bucket().as_str())
    .bind(key.path())
    .bind(owner)
    .bind(&content_type)
    .bind(written.size as i64)
    .bind(&written.sha256)
    .bind(now())
    .execute(pool)
    .await?;

    tracing::info!(
        "Stored {}/{} ({} bytes{})",
        key.bucket(),
        key.path(),
        written.size,
        if written.replaced { ", replaced" } else { "" }
    );

    Ok(UploadResponse {
        bucket: key.bucket().to_string(),
        path: key.path().to_string(),
        content_type,
        size: written.size,
        sha256: written.sha256,
        public_url: key.public_url(&config.public_base_url),
    })
}

/// PUT /api/storage/{bucket}/{*path}
pub async fn put_object(
    State(pool): State<SqlitePool>,
    State(objects): State<ObjectStore>,
    State(config): State<Config>,
    Extension(auth): Extension<AuthContext>,
    AppPath((bucket, path)): AppPath<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let key = parse_key(&bucket, &path)?;
    let content_type = upload_content_type(&headers)?;

    let uploaded = store_object(
        &pool,
        &objects,
        &config,
        auth.identity_id,
        &key,
        content_type,
        body,
    )
    .await?;

    Ok(Json(uploaded))
}

/// GET /api/storage/{bucket}/{*path}
///
/// Public: anyone holding the URL can fetch the object.
pub async fn get_object(
    State(pool): State<SqlitePool>,
    State(objects): State<ObjectStore>,
    AppPath((bucket, path)): AppPath<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let key = parse_key(&bucket, &path)?;

    let meta = sqlx::query_as::<_, ObjectMeta>(
        r#"
        SELECT bucket, path, owner_id, content_type, size, sha256, updated_at
        FROM objects
        WHERE bucket = $1 AND path = $2
        "#,
    )
    .bind(key.bucket().as_str())
    .bind(key.path())
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Object not found".to_string()))?;

    let data = objects
        .get(&key)
        .await?
        .ok_or(AppError::NotFound("Object not found".to_string()))?;

    tracing::debug!(
        "Serving {}/{} ({} bytes, owner {})",
        meta.bucket,
        meta.path,
        meta.size,
        meta.owner_id
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", meta.sha256)) {
        headers.insert(header::ETAG, etag);
    }
    let last_modified = meta.updated_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    // Avatars are overwritten in place; clients must revalidate.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    Ok((headers, data))
}

/// DELETE /api/storage/{bucket}/{*path}
pub async fn delete_object(
    State(pool): State<SqlitePool>,
    State(objects): State<ObjectStore>,
    Extension(auth): Extension<AuthContext>,
    AppPath((bucket, path)): AppPath<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let key = parse_key(&bucket, &path)?;

    let owner = sqlx::query_scalar::<_, Uuid>(
        "SELECT owner_id FROM objects WHERE bucket = $1 AND path = $2",
    )
    .bind(key.bucket().as_str())
    .bind(key.path())
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Object not found".to_string()))?;

    if owner != auth.identity_id {
        return Err(AppError::Forbidden(
            "You are not authorized to delete this object".to_string(),
        ));
    }

    sqlx::query("DELETE FROM objects WHERE bucket = $1 AND path = $2")
        .bind(key.bucket().as_str())
        .bind(key.path())
        .execute(&pool)
        .await?;
    objects.delete(&key).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/posts/images
///
/// Stores a timestamp-named image for a post that is about to be created and
/// returns its URL for the post's `image_url`.
pub async fn upload_post_image(
    State(pool): State<SqlitePool>,
    State(objects): State<ObjectStore>,
    State(config): State<Config>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let content_type = upload_content_type(&headers)?;
    let extension = extension_for(&content_type).unwrap_or("bin");
    let key = ObjectKey::post_image(
        auth.identity_id,
        now().timestamp_millis(),
        extension,
    );

    let uploaded = store_object(
        &pool,
        &objects,
        &config,
        auth.identity_id,
        &key,
        content_type,
        body,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(uploaded)))
}

/// PUT /api/profiles/me/avatar
///
/// Overwrites the caller's avatar slot and points the profile at it.
pub async fn upload_avatar(
    State(pool): State<SqlitePool>,
    State(objects): State<ObjectStore>,
    State(config): State<Config>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let content_type = upload_content_type(&headers)?;
    let key = ObjectKey::avatar(auth.identity_id);

    let uploaded = store_object(
        &pool,
        &objects,
        &config,
        auth.identity_id,
        &key,
        content_type,
        body,
    )
    .await?;

    sqlx::query("UPDATE profiles SET avatar_url = $1 WHERE id = $2")
        .bind(&uploaded.public_url)
        .bind(auth.identity_id)
        .execute(&pool)
        .await?;

    Ok(Json(uploaded))
}
