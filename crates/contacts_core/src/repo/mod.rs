//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `EmailTaken`) in
//!   addition to DB transport errors.
//! - Repositories borrow a connection and never manage transactions.

pub mod user_repo;
