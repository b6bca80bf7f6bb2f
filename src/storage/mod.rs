//! Object storage for avatars and post images.
//!
//! Bytes live on the local filesystem as `{root}/{bucket}/{path}`; the
//! `objects` table keeps the metadata (owner, content type, digest).
//! Writes go to a temp file first and are renamed over the target, so an
//! upload to an existing path replaces it in place.

use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

const MAX_PATH_LEN: usize = 256;
const MAX_SEGMENTS: usize = 8;

pub const ALLOWED_CONTENT_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("unknown bucket: {0}")]
    UnknownBucket(String),

    /// The key collides with a directory, or one of its parents is a file.
    #[error("object path conflicts with an existing object: {0}")]
    PathConflict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    Avatars,
    PostImages,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Avatars => "avatars",
            Bucket::PostImages => "post-images",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "avatars" => Ok(Bucket::Avatars),
            "post-images" => Ok(Bucket::PostImages),
            other => Err(StorageError::UnknownBucket(other.to_string())),
        }
    }
}

/// A validated `(bucket, path)` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    bucket: Bucket,
    path: String,
}

impl ObjectKey {
    pub fn new(bucket: Bucket, path: &str) -> Result<Self> {
        validate_path(path)?;
        Ok(Self {
            bucket,
            path: path.to_string(),
        })
    }

    /// The fixed avatar slot of an identity; re-uploading overwrites it.
    pub fn avatar(owner: Uuid) -> Self {
        Self {
            bucket: Bucket::Avatars,
            path: format!("{}/avatar", owner),
        }
    }

    /// A fresh timestamp-named post image for an identity. The random suffix
    /// keeps two uploads in the same millisecond apart.
    pub fn post_image(owner: Uuid, unix_millis: i64, extension: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            bucket: Bucket::PostImages,
            path: format!("{}/{}-{}.{}", owner, unix_millis, &suffix[..8], extension),
        }
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First path segment, which names the owning identity.
    pub fn owner_segment(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }

    pub fn public_url(&self, base_url: &str) -> String {
        format!("{}/api/storage/{}/{}", base_url, self.bucket, self.path)
    }
}

fn conflict_or_io(key: &ObjectKey, err: std::io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::AlreadyExists | ErrorKind::NotADirectory | ErrorKind::IsADirectory => {
            StorageError::PathConflict(key.path.clone())
        }
        _ => StorageError::Io(err),
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.len() > MAX_PATH_LEN {
        return Err(StorageError::InvalidPath(format!(
            "path must be between 1 and {} bytes",
            MAX_PATH_LEN
        )));
    }

    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 2 {
        return Err(StorageError::InvalidPath(
            "path must be '<owner id>/<name>'".to_string(),
        ));
    }
    if segments.len() > MAX_SEGMENTS {
        return Err(StorageError::InvalidPath(format!(
            "path may have at most {} segments",
            MAX_SEGMENTS
        )));
    }

    for segment in segments {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidPath(format!(
                "illegal segment in '{}'",
                path
            )));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(StorageError::InvalidPath(format!(
                "illegal character in '{}'",
                path
            )));
        }
    }

    Ok(())
}

/// File extension used for timestamp-named uploads of the given content type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct PutObjectResult {
    pub size: u64,
    pub sha256: String,
    /// True when an existing object at the same key was replaced.
    pub replaced: bool,
}

/// Filesystem-backed blob store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: Arc<PathBuf>,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &ObjectKey) -> PathBuf {
        self.root.join(key.bucket.as_str()).join(&key.path)
    }

    pub async fn put(&self, key: &ObjectKey, data: Bytes) -> Result<PutObjectResult> {
        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| conflict_or_io(key, e))?;
        }
        if fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            return Err(StorageError::PathConflict(key.path.clone()));
        }

        let replaced = fs::try_exists(&target).await?;
        let sha256 = format!("{:x}", Sha256::digest(&data));

        let tmp_path = target.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp_path).await?;
        if let Err(e) = file.write_all(&data).await {
            drop(file);
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &target).await?;

        Ok(PutObjectResult {
            size: data.len() as u64,
            sha256,
            replaced,
        })
    }

    pub async fn get(&self, key: &ObjectKey) -> Result<Option<Bytes>> {
        match fs::read(self.object_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns false when nothing was stored at the key.
    pub async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_odd_characters() {
        assert!(ObjectKey::new(Bucket::Avatars, "../etc/passwd").is_err());
        assert!(ObjectKey::new(Bucket::Avatars, "a//b").is_err());
        assert!(ObjectKey::new(Bucket::Avatars, "/abs").is_err());
        assert!(ObjectKey::new(Bucket::Avatars, "a/./b").is_err());
        assert!(ObjectKey::new(Bucket::Avatars, "with space.png").is_err());
        assert!(ObjectKey::new(Bucket::Avatars, "").is_err());
        assert!(ObjectKey::new(Bucket::Avatars, &"x".repeat(300)).is_err());
        assert!(ObjectKey::new(Bucket::Avatars, "a/b/c/d/e/f/g/h/i").is_err());
        // A bare owner segment would take the place of the owner's directory.
        assert!(ObjectKey::new(Bucket::Avatars, &Uuid::new_v4().to_string()).is_err());
    }

    #[test]
    fn post_image_names_do_not_collide_within_a_millisecond() {
        let owner = Uuid::new_v4();
        let a = ObjectKey::post_image(owner, 1_700_000_000_000, "png");
        let b = ObjectKey::post_image(owner, 1_700_000_000_000, "png");
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(&format!("{}/1700000000000-", owner)));
        assert!(a.path().ends_with(".png"));
        assert!(ObjectKey::new(Bucket::PostImages, a.path()).is_ok());
    }

    #[tokio::test]
    async fn writing_over_a_directory_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path()).unwrap();
        let owner = Uuid::new_v4();

        let nested = ObjectKey::new(Bucket::Avatars, &format!("{}/avatar/old.png", owner)).unwrap();
        store.put(&nested, Bytes::from_static(b"nested")).await.unwrap();

        let avatar = ObjectKey::avatar(owner);
        assert!(matches!(
            store.put(&avatar, Bytes::from_static(b"new")).await,
            Err(StorageError::PathConflict(_))
        ));

        let below_avatar_file = ObjectKey::new(
            Bucket::Avatars,
            &format!("{}/avatar/old.png/deeper.png", owner),
        )
        .unwrap();
        assert!(matches!(
            store.put(&below_avatar_file, Bytes::from_static(b"x")).await,
            Err(StorageError::PathConflict(_))
        ));
    }

    #[test]
    fn accepts_owner_prefixed_paths() {
        let owner = Uuid::new_v4();
        let key = ObjectKey::new(Bucket::PostImages, &format!("{}/1700000000000.png", owner))
            .unwrap();
        assert_eq!(key.owner_segment(), owner.to_string());
        assert_eq!(
            key.public_url("http://localhost:3000"),
            format!(
                "http://localhost:3000/api/storage/post-images/{}/1700000000000.png",
                owner
            )
        );
    }

    #[test]
    fn bucket_names_round_trip_through_from_str() {
        assert_eq!("avatars".parse::<Bucket>().unwrap(), Bucket::Avatars);
        assert_eq!("post-images".parse::<Bucket>().unwrap(), Bucket::PostImages);
        assert!(matches!(
            "secrets".parse::<Bucket>(),
            Err(StorageError::UnknownBucket(_))
        ));
    }

    #[tokio::test]
    async fn put_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path()).unwrap();
        let key = ObjectKey::avatar(Uuid::new_v4());

        let first = store.put(&key, Bytes::from_static(b"first")).await.unwrap();
        assert!(!first.replaced);

        let second = store.put(&key, Bytes::from_static(b"second!")).await.unwrap();
        assert!(second.replaced);
        assert_eq!(second.size, 7);
        assert_ne!(first.sha256, second.sha256);

        let data = store.get(&key).await.unwrap().unwrap();
        assert_eq!(&data[..], b"second!");

        assert!(store.delete(&key).await.unwrap());
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(!store.delete(&key).await.unwrap());
    }
}
