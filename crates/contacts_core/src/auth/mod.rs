//! Token authority and credential primitives.
//!
//! # Responsibility
//! - Hash and verify passwords.
//! - Issue and verify scoped, signed tokens (access, refresh,
//!   email-confirmation).
//! - Resolve a principal from an access token through an injected lookup.
//!
//! # Invariants
//! - Signing key and algorithm are fixed at construction and never mutated.
//! - A token verified under one scope never passes verification under
//!   another.
//! - Verification failures are always an explicit [`AuthError`] kind.

mod clock;
mod error;
mod password;
mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthError, AuthResult};
pub use password::{hash_password, verify_password, MAX_PASSWORD_BYTES};
pub use token::{parse_bearer, TokenAuthority, TokenClaims, TokenPair, TokenScope};
