//! Service layer entry points.
//!
//! # Responsibility
//! - Orchestrate token issuance, scoped store access and repositories into
//!   use-case level APIs.
//!
//! # Invariants
//! - Services open their own scopes; callers never pass connections in.

pub mod auth_service;
