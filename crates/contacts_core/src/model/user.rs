//! User account (principal) model.
//!
//! # Responsibility
//! - Define the persisted principal record resolved from verified tokens.
//! - Normalize and validate account identity fields before persistence.
//!
//! # Invariants
//! - `email` is the unique lookup key and is stored trimmed + lowercase.
//! - `confirmed` only moves from `false` to `true`.
//! - `refresh_token` mirrors the latest issued refresh token; it is stored,
//!   not enforced.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable user identifier.
pub type UserId = Uuid;

const USERNAME_MAX_CHARS: usize = 50;
const EMAIL_MAX_CHARS: usize = 254;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex")
});

/// Persisted account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// bcrypt hash; never serialized outward.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub avatar: Option<String>,
    /// Latest issued refresh token; never serialized outward.
    #[serde(skip_serializing, default)]
    pub refresh_token: Option<String>,
    pub confirmed: bool,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

/// Insert model for a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub avatar: Option<String>,
}

impl NewUser {
    /// Builds an insert model with a normalized email.
    pub fn new(
        username: impl Into<String>,
        email: &str,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into().trim().to_string(),
            email: normalize_email(email),
            password_hash: password_hash.into(),
            avatar: None,
        }
    }

    /// Checks identity fields before persistence.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        validate_username(&self.username)?;
        validate_email(&self.email)?;
        if self.password_hash.is_empty() {
            return Err(UserValidationError::MissingPasswordHash);
        }
        Ok(())
    }
}

/// Validation failures for account fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserValidationError {
    EmptyUsername,
    UsernameTooLong { max: usize },
    InvalidEmail(String),
    MissingPasswordHash,
}

impl Display for UserValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyUsername => write!(f, "username must not be empty"),
            Self::UsernameTooLong { max } => {
                write!(f, "username must be at most {max} characters")
            }
            Self::InvalidEmail(value) => write!(f, "invalid email address `{value}`"),
            Self::MissingPasswordHash => write!(f, "password hash is required"),
        }
    }
}

impl Error for UserValidationError {}

/// Canonical lookup form of an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validates an already-normalized email address.
pub fn validate_email(email: &str) -> Result<(), UserValidationError> {
    if email.chars().count() > EMAIL_MAX_CHARS || !EMAIL_RE.is_match(email) {
        return Err(UserValidationError::InvalidEmail(email.to_string()));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<(), UserValidationError> {
    if username.is_empty() {
        return Err(UserValidationError::EmptyUsername);
    }
    if username.chars().count() > USERNAME_MAX_CHARS {
        return Err(UserValidationError::UsernameTooLong {
            max: USERNAME_MAX_CHARS,
        });
    }
    Ok(())
}
