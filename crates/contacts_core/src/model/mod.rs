//! Domain model owned by the auth core.
//!
//! # Responsibility
//! - Define the principal record the token authority resolves to.
//!
//! # Invariants
//! - Every account is identified by a stable `UserId` and a unique email.

pub mod user;
