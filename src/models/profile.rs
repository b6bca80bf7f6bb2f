// src/models/profile.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::utils::text::validate_username;

/// Represents the 'profiles' table: public display data of an identity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Profile {
    /// Same value as the owning identity's id.
    pub id: Uuid,
    pub username: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Author info embedded in feed rows and comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Profile page payload.
#[derive(Debug, Serialize, FromRow)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub username: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub posts_count: i64,
}

/// DTO for editing one's own profile. Absent fields are left unchanged;
/// an empty `bio` clears it.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(custom(function = validate_username))]
    pub username: Option<String>,

    #[validate(length(max = 500, message = "Bio must be at most 500 characters"))]
    pub bio: Option<String>,
}
