use bcrypt::{hash, verify, DEFAULT_COST};
use log::error;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::errors::ApiError;

pub const MIN_PASSWORD_LEN: usize = 6;
const TOKEN_LEN: usize = 64;

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    hash(password, DEFAULT_COST).map_err(|e| {
        error!("Failed to hash password: {}", e);
        ApiError::InternalError("Failed to hash password".to_string())
    })
}

pub fn verify_password(password: &str, hashed: &str) -> Result<bool, ApiError> {
    verify(password, hashed).map_err(|e| {
        error!("Failed to verify password: {}", e);
        ApiError::InternalError("Failed to verify password".to_string())
    })
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Random URL-safe token for verification, reset and sign-in links.
pub fn generate_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
