#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authorization")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Authentication not configured")]
    NotConfigured,
    #[error("Token error: {0}")]
    Encoding(String),
}

/// Session token claims. `sub` is the participant identity.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub room: String,
    pub exp: usize,
}

/// Verified caller of a stage command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub room: String,
}

impl From<Claims> for Session {
    fn from(claims: Claims) -> Self {
        Self {
            identity: claims.sub,
            room: claims.room,
        }
    }
}
