#![forbid(unsafe_code)]

use crate::auth::types::{AuthError, Claims, Session};
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use std::time::{SystemTime, UNIX_EPOCH};

const TOKEN_LIFETIME_SECS: u64 = 6 * 60 * 60;

pub fn create_token(identity: &str, room: &str, secret: &str) -> Result<String, AuthError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| AuthError::Encoding("System clock error".to_string()))?;

    let claims = Claims {
        sub: identity.to_string(),
        room: room.to_string(),
        exp: (now.as_secs() + TOKEN_LIFETIME_SECS) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Encoding(format!("JWT encode error: {e}")))
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    Ok(data.claims)
}

/// Pulls the session token out of `Authorization`. Browser clients
/// send `Token <jwt>`; `Bearer <jwt>` is accepted as well.
pub fn session_from_headers(headers: &HeaderMap, secret: Option<&str>) -> Result<Session, AuthError> {
    let secret = secret.ok_or(AuthError::NotConfigured)?;
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("Token "))
        .ok_or(AuthError::MissingToken)?;

    validate_token(token.trim(), secret).map(Session::from)
}
