//! Account authentication use cases.
//!
//! # Responsibility
//! - Compose the token authority with scoped store access: signup, login,
//!   refresh, current-user resolution, email confirmation and re-request.
//! - Translate repository and token failures into one service error type.
//!
//! # Invariants
//! - Every store access runs inside a `ScopedSession`; writes commit
//!   explicitly and faults roll back.
//! - Mutating use cases use write scopes; lookups use deferred scopes and
//!   run concurrently.
//! - bcrypt work happens outside any open scope so it never holds the
//!   store's write lock.
//! - A failed login stores nothing and issues no token.
//! - The stored refresh token is recorded on login/refresh but not enforced.
//!
//! # See also
//! - `crate::auth::token` for token semantics.
//! - `crate::session` for scope lifecycle.

use crate::auth::{parse_bearer, AuthError, TokenAuthority, TokenPair, MAX_PASSWORD_BYTES};
use crate::config::{ConfigError, Settings};
use crate::model::user::{normalize_email, validate_email, NewUser, User, UserValidationError};
use crate::repo::user_repo::{RepoError, SqliteUserRepository, UserRepository};
use crate::session::{SessionError, SessionManager};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

const PASSWORD_MIN_CHARS: usize = 6;

pub type AuthServiceResult<T> = Result<T, AuthServiceError>;

/// Service-level failure for account use cases.
#[derive(Debug)]
pub enum AuthServiceError {
    Config(ConfigError),
    Auth(AuthError),
    Session(SessionError),
    Repo(RepoError),
    EmailTaken(String),
    UserNotFound(String),
    EmailNotConfirmed,
    InvalidInput(String),
}

impl Display for AuthServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Auth(err) => write!(f, "{err}"),
            Self::Session(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::EmailTaken(email) => write!(f, "account already exists: {email}"),
            Self::UserNotFound(email) => write!(f, "user not found: {email}"),
            Self::EmailNotConfirmed => write!(f, "email not confirmed"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
        }
    }
}

impl Error for AuthServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Auth(err) => Some(err),
            Self::Session(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::EmailTaken(_)
            | Self::UserNotFound(_)
            | Self::EmailNotConfirmed
            | Self::InvalidInput(_) => None,
        }
    }
}

impl From<ConfigError> for AuthServiceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<AuthError> for AuthServiceError {
    fn from(value: AuthError) -> Self {
        Self::Auth(value)
    }
}

impl From<SessionError> for AuthServiceError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl From<UserValidationError> for AuthServiceError {
    fn from(value: UserValidationError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<RepoError> for AuthServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::EmailTaken(email) => Self::EmailTaken(email),
            RepoError::NotFound(email) => Self::UserNotFound(email),
            RepoError::Validation(err) => Self::InvalidInput(err.to_string()),
            other => Self::Repo(other),
        }
    }
}

impl AuthServiceError {
    /// Returns whether the caller should answer with an authentication
    /// challenge (HTTP 401 equivalent).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Auth(err) if err.is_unauthorized())
    }
}

/// Request model for account signup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Created account plus the confirmation token to hand to the mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupOutcome {
    pub user: User,
    pub email_token: String,
}

/// Result of presenting an email-confirmation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    AlreadyConfirmed,
}

/// Result of asking for a fresh confirmation email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEmailOutcome {
    /// A new token was issued for an unconfirmed account.
    Issued { email_token: String },
    AlreadyConfirmed,
    /// No account uses this email. Callers should answer the same way as
    /// for `Issued` to avoid revealing which emails are registered.
    NoAccount,
}

/// Use-case service over a session manager and a token authority.
#[derive(Clone)]
pub struct AuthService {
    sessions: SessionManager,
    tokens: Arc<TokenAuthority>,
    require_confirmed_email: bool,
}

impl AuthService {
    /// Creates a service from already-built components.
    pub fn new(
        sessions: SessionManager,
        tokens: Arc<TokenAuthority>,
        require_confirmed_email: bool,
    ) -> Self {
        Self {
            sessions,
            tokens,
            require_confirmed_email,
        }
    }

    /// Builds both components from settings.
    pub fn from_settings(settings: &Settings) -> AuthServiceResult<Self> {
        let tokens = TokenAuthority::new(settings)?;
        let sessions = SessionManager::new(settings)?;
        Ok(Self::new(
            sessions,
            Arc::new(tokens),
            settings.require_confirmed_email,
        ))
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Creates an unconfirmed account and issues its confirmation token.
    ///
    /// # Errors
    /// - `InvalidInput` for a bad username, email or password length.
    /// - `EmailTaken` when the email is already registered.
    pub fn signup(&self, request: &SignupRequest) -> AuthServiceResult<SignupOutcome> {
        validate_password(&request.password)?;
        let email = normalize_email(&request.email);
        validate_email(&email)?;

        let password_hash = self.tokens.hash_password(&request.password)?;
        let new_user = NewUser::new(request.username.as_str(), &email, password_hash);
        new_user.validate()?;

        let user = self.sessions.with_write_session(|session| -> AuthServiceResult<User> {
            let repo = SqliteUserRepository::new(session);
            if repo.get_user_by_email(&new_user.email)?.is_some() {
                return Err(AuthServiceError::EmailTaken(new_user.email.clone()));
            }
            let user = repo.create_user(&new_user)?;
            session.commit()?;
            Ok(user)
        })?;

        let email_token = self.tokens.issue_email_token(&user.email)?;
        info!("event=signup module=service status=ok user_id={}", user.id);
        Ok(SignupOutcome { user, email_token })
    }

    /// Checks credentials and issues a fresh access + refresh pair.
    ///
    /// Unknown email and wrong password fail identically with
    /// `Unauthorized`.
    pub fn login(&self, email: &str, password: &str) -> AuthServiceResult<TokenPair> {
        let user = self
            .find_user(email)?
            .ok_or(AuthError::Unauthorized("invalid credentials"))?;

        if !self.tokens.verify_password(password, &user.password_hash) {
            warn!(
                "event=login module=service status=rejected user_id={} reason=bad_password",
                user.id
            );
            return Err(AuthError::Unauthorized("invalid credentials").into());
        }
        if self.require_confirmed_email && !user.confirmed {
            warn!(
                "event=login module=service status=rejected user_id={} reason=unconfirmed",
                user.id
            );
            return Err(AuthServiceError::EmailNotConfirmed);
        }

        let pair = self.tokens.issue_token_pair(&user.email)?;
        self.store_refresh_token(&user.email, &pair.refresh_token)?;
        info!("event=login module=service status=ok user_id={}", user.id);
        Ok(pair)
    }

    /// Exchanges a valid refresh token for a new pair.
    pub fn refresh(&self, refresh_token: &str) -> AuthServiceResult<TokenPair> {
        let subject = self.tokens.verify_refresh_token(refresh_token)?;

        self.sessions.with_write_session(|session| -> AuthServiceResult<TokenPair> {
            let repo = SqliteUserRepository::new(session);
            let user = repo
                .get_user_by_email(&subject)?
                .ok_or(AuthError::Unauthorized("unknown principal"))?;

            let matches_stored = user.refresh_token.as_deref() == Some(refresh_token);
            debug!(
                "event=token_refresh module=service status=verified user_id={} stored_token_match={matches_stored}",
                user.id
            );

            let pair = self.tokens.issue_token_pair(&user.email)?;
            repo.update_token(&user.email, Some(&pair.refresh_token))?;
            session.commit()?;
            info!("event=token_refresh module=service status=ok user_id={}", user.id);
            Ok(pair)
        })
    }

    /// Resolves the account behind an access token.
    pub fn current_user(&self, access_token: &str) -> AuthServiceResult<User> {
        self.tokens
            .resolve_principal(access_token, |subject| self.find_user(subject))
    }

    /// Resolves the account behind an `Authorization: Bearer` header value.
    pub fn current_user_from_header(&self, header_value: &str) -> AuthServiceResult<User> {
        let token = parse_bearer(header_value)?;
        self.current_user(token)
    }

    /// Marks the token's account as confirmed.
    ///
    /// The token is not consumed; presenting it again yields
    /// `AlreadyConfirmed` until it expires.
    pub fn confirm_email(&self, email_token: &str) -> AuthServiceResult<ConfirmOutcome> {
        let subject = self.tokens.verify_email_token(email_token)?;

        self.sessions.with_write_session(|session| -> AuthServiceResult<ConfirmOutcome> {
            let repo = SqliteUserRepository::new(session);
            let user = repo
                .get_user_by_email(&subject)?
                .ok_or_else(|| AuthServiceError::UserNotFound(subject.clone()))?;
            if user.confirmed {
                return Ok(ConfirmOutcome::AlreadyConfirmed);
            }
            repo.confirmed_email(&user.email)?;
            session.commit()?;
            info!("event=email_confirm module=service status=ok user_id={}", user.id);
            Ok(ConfirmOutcome::Confirmed)
        })
    }

    /// Issues a new confirmation token for an unconfirmed account.
    pub fn request_email(&self, email: &str) -> AuthServiceResult<RequestEmailOutcome> {
        let Some(user) = self.find_user(email)? else {
            debug!("event=email_request module=service status=skipped reason=no_account");
            return Ok(RequestEmailOutcome::NoAccount);
        };
        if user.confirmed {
            return Ok(RequestEmailOutcome::AlreadyConfirmed);
        }
        let email_token = self.tokens.issue_email_token(&user.email)?;
        info!("event=email_request module=service status=ok user_id={}", user.id);
        Ok(RequestEmailOutcome::Issued { email_token })
    }

    /// Replaces the avatar URL of the account behind an access token.
    pub fn update_avatar(&self, access_token: &str, avatar_url: &str) -> AuthServiceResult<User> {
        let avatar_url = avatar_url.trim();
        if avatar_url.is_empty() {
            return Err(AuthServiceError::InvalidInput(
                "avatar url must not be empty".to_string(),
            ));
        }
        let user = self.current_user(access_token)?;

        self.sessions.with_write_session(|session| -> AuthServiceResult<User> {
            let updated = SqliteUserRepository::new(session).update_avatar(&user.email, avatar_url)?;
            session.commit()?;
            info!("event=avatar_update module=service status=ok user_id={}", updated.id);
            Ok(updated)
        })
    }

    fn find_user(&self, email: &str) -> AuthServiceResult<Option<User>> {
        self.sessions.with_session(|session| -> AuthServiceResult<Option<User>> {
            let user = SqliteUserRepository::new(session).get_user_by_email(email)?;
            Ok(user)
        })
    }

    fn store_refresh_token(&self, email: &str, refresh_token: &str) -> AuthServiceResult<()> {
        self.sessions.with_write_session(|session| -> AuthServiceResult<()> {
            SqliteUserRepository::new(session).update_token(email, Some(refresh_token))?;
            session.commit()?;
            Ok(())
        })
    }
}

fn validate_password(password: &str) -> AuthServiceResult<()> {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(AuthServiceError::InvalidInput(format!(
            "password must be at least {PASSWORD_MIN_CHARS} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(AuthServiceError::InvalidInput(format!(
            "password must be at most {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_password, AuthServiceError};
    use crate::auth::AuthError;
    use crate::repo::user_repo::RepoError;

    #[test]
    fn password_length_bounds() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
        assert!(validate_password(&"x".repeat(72)).is_ok());
        assert!(validate_password(&"x".repeat(73)).is_err());
    }

    #[test]
    fn repo_errors_map_to_semantic_variants() {
        let err: AuthServiceError = RepoError::EmailTaken("a@b.com".to_string()).into();
        assert!(matches!(err, AuthServiceError::EmailTaken(_)));
        let err: AuthServiceError = RepoError::NotFound("a@b.com".to_string()).into();
        assert!(matches!(err, AuthServiceError::UserNotFound(_)));
    }

    #[test]
    fn only_unauthorized_auth_errors_challenge() {
        assert!(AuthServiceError::from(AuthError::Unauthorized("x")).is_unauthorized());
        assert!(!AuthServiceError::from(AuthError::UnprocessableToken("x")).is_unauthorized());
        assert!(!AuthServiceError::EmailNotConfirmed.is_unauthorized());
    }
}
