// src/handlers/auth.rs

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Duration;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::Config,
    db,
    error::{AppError, is_unique_violation},
    extract::AppJson,
    models::{
        identity::{
            Identity, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, Session,
            SessionResponse,
        },
        profile::Profile,
    },
    utils::{
        hash::{hash_password, verify_against_dummy, verify_password},
        jwt::{AuthContext, Viewer, sign_jwt},
        now,
    },
};

/// Registers a new account: identity plus public profile.
///
/// Both rows are written in one transaction; a failed profile insert rolls the
/// identity back, so no credential without a profile can be left behind.
pub async fn register(
    State(pool): State<SqlitePool>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let email = payload.email.trim().to_lowercase();

    let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM profiles WHERE username = $1")
        .bind(&payload.username)
        .fetch_one(&pool)
        .await?;
    if taken > 0 {
        return Err(AppError::Conflict("Username already taken".to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;
    let created_at = now();

    let identity = Identity {
        id: Uuid::new_v4(),
        email,
        password: hashed_password,
        created_at,
    };
    let profile = Profile {
        id: identity.id,
        username: payload.username.clone(),
        bio: None,
        avatar_url: None,
        created_at,
    };

    let mut tx = db::begin_write(&pool).await?;

    sqlx::query("INSERT INTO identities (id, email, password, created_at) VALUES ($1, $2, $3, $4)")
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.password)
        .bind(identity.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Email already registered".to_string())
            } else {
                tracing::error!("Failed to create identity: {:?}", e);
                AppError::from(e)
            }
        })?;

    if let Err(e) = sqlx::query(
        "INSERT INTO profiles (id, username, bio, avatar_url, created_at) VALUES ($1, $2, NULL, NULL, $3)",
    )
    .bind(profile.id)
    .bind(&profile.username)
    .bind(profile.created_at)
    .execute(&mut *tx)
    .await
    {
        tracing::warn!(
            "Profile creation failed for identity {}, rolling back: {:?}",
            identity.id,
            e
        );
        tx.rollback().await?;
        return Err(if is_unique_violation(&e) {
            AppError::Conflict("Username already taken".to_string())
        } else {
            AppError::from(e)
        });
    }

    tx.commit().await?;

    tracing::info!("Registered {} as '{}'", identity.id, profile.username);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { identity, profile }),
    ))
}

/// Authenticates by email and password and opens a session.
///
/// Unknown email and wrong password are indistinguishable to the caller.
pub async fn login(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let identity = sqlx::query_as::<_, Identity>(
        "SELECT id, email, password, created_at FROM identities WHERE email = $1",
    )
    .bind(payload.email.trim().to_lowercase())
    .fetch_optional(&pool)
    .await?;

    let invalid = || AppError::AuthError("Invalid email or password".to_string());

    let Some(identity) = identity else {
        verify_against_dummy(&payload.password);
        return Err(invalid());
    };

    if !verify_password(&payload.password, &identity.password)? {
        return Err(invalid());
    }

    let created_at = now();
    let session = Session {
        id: Uuid::new_v4(),
        identity_id: identity.id,
        created_at,
        expires_at: created_at + Duration::seconds(config.jwt_expiration as i64),
    };

    sqlx::query(
        "INSERT INTO sessions (id, identity_id, created_at, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(session.id)
    .bind(session.identity_id)
    .bind(session.created_at)
    .bind(session.expires_at)
    .execute(&pool)
    .await?;

    let token = sign_jwt(
        identity.id,
        session.id,
        &config.jwt_secret,
        config.jwt_expiration,
    )?;

    tracing::info!("Session {} opened for {}", session.id, identity.id);

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer",
        expires_at: session.expires_at,
        identity,
    }))
}

/// Revokes the session the request was made with.
pub async fn logout(
    State(pool): State<SqlitePool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(auth.session_id)
        .execute(&pool)
        .await?;

    // Expired sessions of the same identity are dead weight.
    sqlx::query("DELETE FROM sessions WHERE identity_id = $1 AND expires_at <= $2")
        .bind(auth.identity_id)
        .bind(now())
        .execute(&pool)
        .await?;

    tracing::info!("Session {} closed", auth.session_id);

    Ok(StatusCode::NO_CONTENT)
}

/// Resolves the presented token to its identity; null when anonymous.
pub async fn session(
    State(pool): State<SqlitePool>,
    viewer: Viewer,
) -> Result<impl IntoResponse, AppError> {
    let identity = match viewer.identity_id() {
        Some(identity_id) => {
            sqlx::query_as::<_, Identity>(
                "SELECT id, email, password, created_at FROM identities WHERE id = $1",
            )
            .bind(identity_id)
            .fetch_optional(&pool)
            .await?
        }
        None => None,
    };

    Ok(Json(SessionResponse { identity }))
}
