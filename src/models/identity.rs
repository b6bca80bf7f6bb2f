// src/models/identity.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{models::profile::Profile, utils::text::validate_username};

/// Represents the 'identities' table: an authenticated account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,

    /// Unique login email.
    pub email: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    pub created_at: DateTime<Utc>,
}

/// Represents the 'sessions' table. A bearer token is honoured only while
/// its session row exists and has not expired.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// DTO for creating a new account (Registration).
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "A valid email address is required."))]
    pub email: String,

    #[validate(length(
        min = 6,
        max = 128,
        message = "Password length must be between 6 and 128 characters."
    ))]
    pub password: String,

    #[validate(custom(function = validate_username))]
    pub username: String,
}

/// DTO for login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// Returned by a successful registration.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub identity: Identity,
    pub profile: Profile,
}

/// Returned by a successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "type")]
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

/// Current session lookup; `identity` is null for anonymous callers.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub identity: Option<Identity>,
}
