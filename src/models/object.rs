use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Represents the 'objects' table: metadata of a stored blob.
#[derive(Debug, Clone, FromRow)]
pub struct ObjectMeta {
    pub bucket: String,
    pub path: String,
    pub owner_id: Uuid,
    pub content_type: String,
    pub size: i64,
    pub sha256: String,
    pub updated_at: DateTime<Utc>,
}

/// Returned by uploads.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub bucket: String,
    pub path: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
    /// Stable URL; re-uploading to the same path keeps it valid.
    pub public_url: String,
}
