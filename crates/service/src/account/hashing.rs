//! Password hashing.
//!
//! Argon2id with a fresh random salt per hash, stored as a PHC string so the
//! parameters travel with the hash.

use argon2::password_hash::{Error as PasswordHashError, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    /// The stored value is not an Argon2id PHC string.
    #[error("malformed password hash: {0}")]
    Malformed(String),
    #[error("password hashing failed: {0}")]
    Failed(String),
    #[error("invalid Argon2 parameters: {0}")]
    InvalidParams(String),
}

/// Reference password for the timing-equalisation comparison. Unrelated to
/// any account.
pub const DUMMY_COMPARE_PASSWORD: &str = "reference-password-for-timing";

/// Input behind each hasher's dummy hash. Differs from
/// [`DUMMY_COMPARE_PASSWORD`], so the dummy comparison does full work and
/// never matches.
const DUMMY_HASH_INPUT: &str = "reference-hash-input-for-timing";

/// One-way credential hashing.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, HashError>;

    /// `Ok(false)` for a wrong password; `Err` only when `hash` cannot be
    /// parsed.
    fn compare(&self, password: &str, hash: &str) -> Result<bool, HashError>;

    /// A comparison that costs the same as a real [`compare`](Self::compare)
    /// and whose outcome is discarded.
    fn dummy_compare(&self);
}

pub struct Argon2IdHasher {
    argon2: Argon2<'static>,
    /// Hash of [`DUMMY_HASH_INPUT`] under this hasher's own parameters.
    dummy_hash: String,
}

impl Argon2IdHasher {
    pub const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
    pub const DEFAULT_ITERATIONS: u32 = 1;
    pub const DEFAULT_PARALLELISM: u32 = 8;

    /// Builds the hasher and derives its dummy hash, which costs one full
    /// hash up front.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, HashError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| HashError::InvalidParams(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(DUMMY_HASH_INPUT.as_bytes(), &salt)
            .map_err(|e| HashError::Failed(e.to_string()))?
            .to_string();
        Ok(Self { argon2, dummy_hash })
    }

    pub fn with_defaults() -> Result<Self, HashError> {
        Self::new(Self::DEFAULT_MEMORY_KIB, Self::DEFAULT_ITERATIONS, Self::DEFAULT_PARALLELISM)
    }

    pub fn from_config(cfg: &configs::HashingConfig) -> Result<Self, HashError> {
        Self::new(cfg.memory_kib, cfg.iterations, cfg.parallelism)
    }

    pub fn dummy_hash(&self) -> &str {
        &self.dummy_hash
    }
}

impl PasswordHasher for Argon2IdHasher {
    fn hash(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| HashError::Failed(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn compare(&self, password: &str, hash: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(hash).map_err(|e| HashError::Malformed(e.to_string()))?;
        if parsed.algorithm != argon2::ARGON2ID_IDENT {
            return Err(HashError::Malformed(format!("unexpected algorithm {}", parsed.algorithm)));
        }
        // Verification re-derives with the parameters embedded in the hash.
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(PasswordHashError::Password) => Ok(false),
            Err(e) => Err(HashError::Malformed(e.to_string())),
        }
    }

    fn dummy_compare(&self) {
        let _ = self.compare(DUMMY_COMPARE_PASSWORD, &self.dummy_hash);
    }
}

/// Fast, inspectable hasher for tests and doc examples.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PREFIX: &str = "plain$";

    /// What [`PlainHasher::dummy_compare`] compares against.
    pub const DUMMY_HASH: &str = "plain$dummy$reference-hash-input-for-timing";

    /// Produces `plain$<n>$<password>` and records every hash it is asked to
    /// compare against.
    #[derive(Default)]
    pub struct PlainHasher {
        counter: AtomicUsize,
        fail_hash: AtomicBool,
        compared: Mutex<Vec<String>>,
    }

    impl PlainHasher {
        pub fn failing() -> Self {
            let h = Self::default();
            h.fail_hash.store(true, Ordering::SeqCst);
            h
        }

        /// Hashes passed to `compare`, in call order.
        pub fn compared_hashes(&self) -> Vec<String> {
            self.compared.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    impl PasswordHasher for PlainHasher {
        fn hash(&self, password: &str) -> Result<String, HashError> {
            if self.fail_hash.load(Ordering::SeqCst) {
                return Err(HashError::Failed("hasher configured to fail".into()));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{PREFIX}{n}${password}"))
        }

        fn compare(&self, password: &str, hash: &str) -> Result<bool, HashError> {
            self.compared.lock().unwrap_or_else(|e| e.into_inner()).push(hash.to_string());
            let stored = hash
                .strip_prefix(PREFIX)
                .and_then(|rest| rest.split_once('$'))
                .map(|(_, pw)| pw)
                .ok_or_else(|| HashError::Malformed(format!("not a plain hash: {hash}")))?;
            Ok(stored == password)
        }

        fn dummy_compare(&self) {
            let _ = self.compare(DUMMY_COMPARE_PASSWORD, DUMMY_HASH);
        }
    }
}
