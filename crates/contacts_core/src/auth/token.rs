//! Scoped JWT issuance and verification.
//!
//! # Responsibility
//! - Mint access, refresh and email-confirmation tokens from one symmetric
//!   secret and one HMAC algorithm.
//! - Verify signature, algorithm, expiry, subject and scope.
//! - Compose access-token verification with a principal lookup.
//!
//! # Invariants
//! - Claims are `{sub, iat, exp, scope?}` with `exp > iat`.
//! - Access tokens carry `scope="access"`, refresh tokens
//!   `scope="refresh"`, email tokens no scope claim.
//! - Access/refresh failures are `Unauthorized`; email failures are
//!   `UnprocessableToken`. The reason payload never changes the kind.
//! - Expiry is judged against the authority's clock with zero leeway.
//!
//! # See also
//! - `crate::service::auth_service` for the use cases built on top.

use super::clock::{Clock, SystemClock};
use super::error::{AuthError, AuthResult};
use super::password;
use crate::config::{ConfigError, Settings};
use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BEARER_SCHEME: &str = "bearer";

/// Permitted use of a token, carried in the `scope` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    Access,
    Refresh,
    /// Implicit scope of email tokens; never written into the claim.
    EmailConfirm,
}

/// Signed claim set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Principal identifier (the account email).
    #[serde(default)]
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<TokenScope>,
}

/// Access + refresh tokens issued together on login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

/// Why a token failed to decode, before mapping to a public error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Malformed,
    BadSignature,
    WrongAlgorithm,
    Expired,
    MissingSubject,
    WrongScope,
}

impl Rejection {
    fn reason(self) -> &'static str {
        match self {
            Self::Malformed => "malformed token",
            Self::BadSignature => "signature mismatch",
            Self::WrongAlgorithm => "unexpected signing algorithm",
            Self::Expired => "token expired",
            Self::MissingSubject => "missing subject",
            Self::WrongScope => "invalid scope for token",
        }
    }
}

/// Issues and verifies scoped tokens and hashes passwords.
///
/// Built once from [`Settings`] and shared read-only (wrap in `Arc`).
pub struct TokenAuthority {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
    email_ttl: Duration,
    bcrypt_cost: u32,
    clock: Arc<dyn Clock>,
}

impl TokenAuthority {
    /// Creates an authority on the system clock.
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Creates an authority on an explicit clock.
    pub fn with_clock(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        settings.validate()?;
        let algorithm = settings.signing_algorithm()?;
        let secret = settings.secret_key.as_bytes();

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        // Expiry is checked against `clock` in `decode_claims`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_ttl: settings.access_token_ttl()?,
            refresh_ttl: settings.refresh_token_ttl()?,
            email_ttl: settings.email_token_ttl()?,
            bcrypt_cost: settings.bcrypt_cost,
            clock,
        })
    }

    /// Hashes a password at the configured bcrypt cost.
    pub fn hash_password(&self, plaintext: &str) -> AuthResult<String> {
        password::hash_password(plaintext, self.bcrypt_cost)
    }

    /// Verifies a password; malformed hashes verify as `false`.
    pub fn verify_password(&self, plaintext: &str, hash: &str) -> bool {
        password::verify_password(plaintext, hash)
    }

    /// Issues an access token; `ttl` defaults to the configured lifetime.
    pub fn issue_access_token(&self, subject: &str, ttl: Option<Duration>) -> AuthResult<String> {
        self.issue(subject, Some(TokenScope::Access), ttl.unwrap_or(self.access_ttl))
    }

    /// Issues a refresh token; `ttl` defaults to the configured lifetime.
    pub fn issue_refresh_token(&self, subject: &str, ttl: Option<Duration>) -> AuthResult<String> {
        self.issue(subject, Some(TokenScope::Refresh), ttl.unwrap_or(self.refresh_ttl))
    }

    /// Issues an email-confirmation token (no scope claim).
    pub fn issue_email_token(&self, subject: &str) -> AuthResult<String> {
        self.issue(subject, None, self.email_ttl)
    }

    /// Issues an access + refresh pair with default lifetimes.
    pub fn issue_token_pair(&self, subject: &str) -> AuthResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access_token(subject, None)?,
            refresh_token: self.issue_refresh_token(subject, None)?,
            token_type: "bearer",
        })
    }

    /// Verifies an access token and returns its subject.
    pub fn verify_access_token(&self, token: &str) -> AuthResult<String> {
        self.verify_scoped(token, TokenScope::Access)
    }

    /// Verifies a refresh token and returns its subject.
    pub fn verify_refresh_token(&self, token: &str) -> AuthResult<String> {
        self.verify_scoped(token, TokenScope::Refresh)
    }

    /// Verifies an email-confirmation token and returns its subject.
    ///
    /// Tokens carrying an access or refresh scope are rejected.
    pub fn verify_email_token(&self, token: &str) -> AuthResult<String> {
        let result = self.decode_claims(token).and_then(|claims| match claims.scope {
            None | Some(TokenScope::EmailConfirm) => Ok(claims.sub),
            Some(_) => Err(Rejection::WrongScope),
        });
        result.map_err(|rejection| {
            debug!(
                "event=token_verify module=auth status=rejected scope=email_confirm reason=\"{}\"",
                rejection.reason()
            );
            AuthError::UnprocessableToken(rejection.reason())
        })
    }

    /// Verifies an access token, then resolves its subject through `lookup`.
    ///
    /// A lookup miss is `Unauthorized`; lookup errors propagate unchanged.
    pub fn resolve_principal<P, E, F>(&self, token: &str, lookup: F) -> Result<P, E>
    where
        F: FnOnce(&str) -> Result<Option<P>, E>,
        E: From<AuthError>,
    {
        let subject = self.verify_access_token(token)?;
        match lookup(&subject)? {
            Some(principal) => Ok(principal),
            None => {
                debug!("event=principal_resolve module=auth status=rejected reason=\"unknown principal\"");
                Err(AuthError::Unauthorized("unknown principal").into())
            }
        }
    }

    /// Decodes and fully validates a token, returning its claims.
    ///
    /// Does not check scope; used by callers that need `iat`/`exp`.
    pub fn inspect(&self, token: &str) -> AuthResult<TokenClaims> {
        self.decode_claims(token)
            .map_err(|rejection| AuthError::Unauthorized(rejection.reason()))
    }

    fn issue(&self, subject: &str, scope: Option<TokenScope>, ttl: Duration) -> AuthResult<String> {
        if ttl.num_seconds() < 1 {
            return Err(AuthError::InvalidLifetime {
                seconds: ttl.num_seconds(),
            });
        }

        let issued_at = self.clock.now();
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or(AuthError::InvalidLifetime {
                seconds: ttl.num_seconds(),
            })?;
        let claims = TokenClaims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            scope,
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key).map_err(|err| {
            error!("event=token_issue module=auth status=error error={err}");
            AuthError::Signing(err.to_string())
        })
    }

    fn verify_scoped(&self, token: &str, expected: TokenScope) -> AuthResult<String> {
        let result = self.decode_claims(token).and_then(|claims| {
            if claims.scope == Some(expected) {
                Ok(claims.sub)
            } else {
                Err(Rejection::WrongScope)
            }
        });
        result.map_err(|rejection| {
            debug!(
                "event=token_verify module=auth status=rejected scope={expected:?} reason=\"{}\"",
                rejection.reason()
            );
            AuthError::Unauthorized(rejection.reason())
        })
    }

    fn decode_claims(&self, token: &str) -> Result<TokenClaims, Rejection> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::InvalidSignature => Rejection::BadSignature,
                ErrorKind::InvalidAlgorithm => Rejection::WrongAlgorithm,
                _ => Rejection::Malformed,
            },
        )?;

        let claims = data.claims;
        if claims.sub.trim().is_empty() {
            return Err(Rejection::MissingSubject);
        }
        if claims.exp <= self.clock.now().timestamp() {
            return Err(Rejection::Expired);
        }
        Ok(claims)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn parse_bearer(header_value: &str) -> AuthResult<&str> {
    let (scheme, token) = header_value
        .trim()
        .split_once(char::is_whitespace)
        .ok_or(AuthError::Unauthorized("missing bearer token"))?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return Err(AuthError::Unauthorized("unsupported authorization scheme"));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Unauthorized("missing bearer token"));
    }
    Ok(token)
}
