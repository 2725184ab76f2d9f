//! Accounts: registration, email verification and login.
//!
//! `domain` holds the validated inputs and records, `repository` the
//! persistence contract (with `repo` for the SeaORM implementation), and
//! `service` the workflows. Each collaborator trait ships a `mock` module for
//! tests.

pub mod domain;
pub mod errors;
pub mod hashing;
pub mod mailer;
pub mod repo;
pub mod repository;
pub mod service;
pub mod setup;
pub mod token;

pub use errors::AccountError;
pub use service::{AccountConfig, AccountService};
