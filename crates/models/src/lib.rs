//! SeaORM entities and query functions for the identity tables.
//!
//! Query functions are generic over [`sea_orm::ConnectionTrait`] so the same
//! code runs against the pool and inside a transaction.

pub mod errors;
pub mod db;
pub mod user;
pub mod email_verification_key;

#[cfg(test)]
mod tests;
