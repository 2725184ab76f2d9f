//! Shared plumbing for the identity workspace binaries.

pub mod utils;
