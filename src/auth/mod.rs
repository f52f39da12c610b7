#![forbid(unsafe_code)]

pub mod jwt;
pub mod types;

pub use types::{AuthError, Claims, Session};
