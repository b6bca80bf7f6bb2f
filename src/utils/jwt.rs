// src/utils/jwt.rs

use std::{
    convert::Infallible,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

/// JWT Claims structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - the identity id.
    pub sub: String,
    /// Session id; the token is only honoured while this session row exists.
    pub sid: String,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

/// The authenticated caller, injected into request extensions by the auth
/// middlewares. Handlers take it as `Extension<AuthContext>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub identity_id: Uuid,
    pub session_id: Uuid,
}

/// The caller on routes behind `optional_auth_middleware`: `None` when anonymous.
#[derive(Debug, Clone, Copy)]
pub struct Viewer(pub Option<AuthContext>);

impl Viewer {
    pub fn identity_id(&self) -> Option<Uuid> {
        self.0.map(|ctx| ctx.identity_id)
    }
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Viewer(parts.extensions.get::<AuthContext>().copied()))
    }
}

/// Signs a token bound to one session.
pub fn sign_jwt(
    identity_id: Uuid,
    session_id: Uuid,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let expiration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs() as usize
        + expiration_seconds as usize;

    let claims = Claims {
        sub: identity_id.to_string(),
        sid: session_id.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Verifies signature and expiry and parses the ids out of the claims.
pub fn verify_jwt(token: &str, secret: &str) -> Result<AuthContext, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    let identity_id = Uuid::parse_str(&token_data.claims.sub)
        .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;
    let session_id = Uuid::parse_str(&token_data.claims.sid)
        .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(AuthContext {
        identity_id,
        session_id,
    })
}

fn bearer_token(req: &Request<Body>) -> Option<Result<&str, AppError>> {
    let value = req.headers().get(header::AUTHORIZATION)?;
    Some(
        value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::AuthError("Malformed Authorization header".to_string())),
    )
}

/// Validates a token against the session table.
async fn resolve_session(state: &AppState, token: &str) -> Result<AuthContext, AppError> {
    let ctx = verify_jwt(token, &state.config.jwt_secret)?;

    let live = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sessions WHERE id = $1 AND identity_id = $2 AND expires_at > $3",
    )
    .bind(ctx.session_id)
    .bind(ctx.identity_id)
    .bind(Utc::now())
    .fetch_one(&state.pool)
    .await?;

    if live == 0 {
        return Err(AppError::AuthError("Session expired or revoked".to_string()));
    }

    Ok(ctx)
}

/// Axum Middleware: Authentication.
///
/// Requires 'Authorization: Bearer <token>' backed by a live session.
/// Injects `AuthContext` into the request extensions; otherwise 401.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)
        .ok_or_else(|| AppError::AuthError("Missing bearer token".to_string()))??;

    let ctx = resolve_session(&state, token).await?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Axum Middleware: Optional Authentication.
///
/// Anonymous requests pass through without an `AuthContext`; a token that is
/// present but invalid is still rejected with 401.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = bearer_token(&req) {
        let ctx = resolve_session(&state, token?).await?;
        req.extensions_mut().insert(ctx);
    }
    Ok(next.run(req).await)
}
