use std::error::Error;
use std::fmt::{Display, Formatter};

pub type AuthResult<T> = Result<T, AuthError>;

/// Failure kinds produced by the token authority.
///
/// `Unauthorized` and `UnprocessableToken` are the two externally visible
/// verification outcomes. The `&'static str` payload names the concrete
/// cause for diagnostics only; callers must branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Bad, expired or wrong-scope access/refresh token, unknown principal,
    /// or rejected credentials.
    Unauthorized(&'static str),
    /// Malformed or expired email-confirmation token.
    UnprocessableToken(&'static str),
    /// Requested token lifetime would not satisfy `exp > iat`, or its expiry
    /// falls past the last representable timestamp.
    InvalidLifetime { seconds: i64 },
    /// Token encoding failed.
    Signing(String),
    /// Password hashing failed.
    Hashing(String),
}

impl AuthError {
    /// Returns whether this is the `Unauthorized` kind.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized(reason) => {
                write!(f, "could not validate credentials ({reason})")
            }
            Self::UnprocessableToken(reason) => {
                write!(f, "invalid token for email verification ({reason})")
            }
            Self::InvalidLifetime { seconds } => {
                write!(f, "token lifetime out of range: {seconds}s")
            }
            Self::Signing(message) => write!(f, "token signing failed: {message}"),
            Self::Hashing(message) => write!(f, "password hashing failed: {message}"),
        }
    }
}

impl Error for AuthError {}
