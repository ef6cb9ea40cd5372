use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{auth::repo_types::Role, error::ApiError};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(email: &str) -> Result<(), ApiError> {
    if email.len() > 255 || !is_valid_email(email) {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }
    Ok(())
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

impl SignUpRequest {
    /// Normalizes the email and checks field bounds; guests cannot be registered.
    pub fn validate(mut self) -> Result<Self, ApiError> {
        self.name = self.name.trim().to_string();
        self.email = normalize_email(&self.email);

        let name_len = self.name.chars().count();
        if !(2..=255).contains(&name_len) {
            return Err(ApiError::BadRequest(
                "Name must be between 2 and 255 characters".into(),
            ));
        }
        check_email(&self.email)?;
        let password_len = self.password.chars().count();
        if !(6..=128).contains(&password_len) {
            return Err(ApiError::BadRequest(
                "Password must be between 6 and 128 characters".into(),
            ));
        }
        if self.role == Some(Role::Guest) {
            return Err(ApiError::BadRequest("Role must be user or admin".into()));
        }
        Ok(self)
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

impl SignInRequest {
    pub fn validate(mut self) -> Result<Self, ApiError> {
        self.email = normalize_email(&self.email);
        check_email(&self.email)?;
        if self.password.is_empty() {
            return Err(ApiError::BadRequest("Password is required".into()));
        }
        Ok(self)
    }
}

/// Response returned after sign-up or sign-in; the token travels in a cookie.
#[derive(Debug, Serialize)]
pub struct AuthResponse<U> {
    pub message: &'static str,
    pub user: U,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
