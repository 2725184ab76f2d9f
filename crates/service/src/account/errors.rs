use thiserror::Error;
use uuid::Uuid;

use super::hashing::HashError;
use super::mailer::MailError;

/// Failures from the persistence gateway.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Db(String),
    #[error("invalid record: {0}")]
    Invalid(String),
}

impl From<models::errors::ModelError> for RepositoryError {
    fn from(e: models::errors::ModelError) -> Self {
        match e {
            models::errors::ModelError::Validation(msg) => RepositoryError::Invalid(msg),
            models::errors::ModelError::Db(msg) => RepositoryError::Db(msg),
        }
    }
}

/// Business errors for account workflows.
///
/// `InvalidCredentials` and `InvalidToken` are expected outcomes callers
/// branch on; every other variant is internal and should be rendered as a
/// generic failure.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Unknown account or wrong password; deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Unknown or expired verification token; deliberately indistinguishable.
    #[error("invalid token")]
    InvalidToken,
    #[error("hashing password: {0}")]
    Hash(#[source] HashError),
    #[error("stored password hash for user {user_id} is unusable: {source}")]
    CorruptHash {
        user_id: Uuid,
        #[source]
        source: HashError,
    },
    #[error("{context}: {source}")]
    Repository {
        context: String,
        #[source]
        source: RepositoryError,
    },
    #[error("sending notification: {0}")]
    Notification(#[source] MailError),
    /// The transaction could not be rolled back after `cause` aborted it.
    #[error("{cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        cause: Box<AccountError>,
        rollback: RepositoryError,
    },
    /// The email is verified, but the consumed key could not be removed.
    #[error("email verified, but deleting verification key {key_id} failed: {source}")]
    KeyCleanup {
        key_id: i32,
        #[source]
        source: RepositoryError,
    },
}

impl AccountError {
    pub(crate) fn repository(context: impl Into<String>, source: RepositoryError) -> Self {
        AccountError::Repository { context: context.into(), source }
    }

    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            AccountError::InvalidCredentials => 1004,
            AccountError::InvalidToken => 1005,
            AccountError::Hash(_) => 1101,
            AccountError::CorruptHash { .. } => 1103,
            AccountError::Repository { .. } => 1200,
            AccountError::RollbackFailed { .. } => 1201,
            AccountError::KeyCleanup { .. } => 1202,
            AccountError::Notification(_) => 1300,
        }
    }

    /// True for failures that are not the caller's fault.
    pub fn is_internal(&self) -> bool {
        !matches!(self, AccountError::InvalidCredentials | AccountError::InvalidToken)
    }
}
