//! Authentication and session-lifetime core for the contacts backend.
//! This crate is the single source of truth for token and account invariants.

pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod session;

pub use auth::{
    parse_bearer, AuthError, AuthResult, Clock, ManualClock, SystemClock, TokenAuthority,
    TokenClaims, TokenPair, TokenScope, MAX_PASSWORD_BYTES,
};
pub use config::{ConfigError, Settings};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status};
pub use model::user::{NewUser, User, UserId, UserValidationError};
pub use repo::user_repo::{RepoError, RepoResult, SqliteUserRepository, UserRepository};
pub use service::auth_service::{
    AuthService, AuthServiceError, AuthServiceResult, ConfirmOutcome, RequestEmailOutcome,
    SignupOutcome, SignupRequest,
};
pub use session::{ScopeMode, ScopedSession, SessionError, SessionManager};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
