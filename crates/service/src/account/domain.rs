use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EMAIL_MIN_LEN: usize = 3;
pub const EMAIL_MAX_LEN: usize = 254;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 1000;

/// Single validation failure for one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Stable machine-readable code: `required`, `email`, `min` or `max`.
    pub code: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Every problem found with a registration submission, grouped by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewUserErrors {
    pub email: Vec<FieldError>,
    pub password: Vec<FieldError>,
}

impl NewUserErrors {
    pub fn is_empty(&self) -> bool {
        self.email.is_empty() && self.password.is_empty()
    }

    pub fn email_codes(&self) -> Vec<&'static str> {
        self.email.iter().map(|e| e.code).collect()
    }

    pub fn password_codes(&self) -> Vec<&'static str> {
        self.password.iter().map(|e| e.code).collect()
    }
}

impl fmt::Display for NewUserErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid registration: email {:?}, password {:?}",
            self.email_codes(),
            self.password_codes()
        )
    }
}

impl std::error::Error for NewUserErrors {}

/// Registration input that has passed validation. The only way to build one
/// is [`NewUser::parse`].
#[derive(Clone)]
pub struct NewUser {
    email: String,
    password: String,
}

impl NewUser {
    /// Validate raw form input.
    ///
    /// The email is trimmed; the password is taken as-is since whitespace in
    /// it is significant. Both fields are always checked so the caller gets
    /// every error at once.
    ///
    /// # Examples
    /// ```
    /// use service::account::domain::NewUser;
    /// let user = NewUser::parse("  a@example.com ", "longenough").unwrap();
    /// assert_eq!(user.email(), "a@example.com");
    ///
    /// let errs = NewUser::parse("nope", "short").unwrap_err();
    /// assert_eq!(errs.email_codes(), vec!["email"]);
    /// assert_eq!(errs.password_codes(), vec!["min"]);
    /// ```
    pub fn parse(email: &str, password: &str) -> Result<Self, NewUserErrors> {
        let mut errors = NewUserErrors::default();

        let email = email.trim();
        if email.is_empty() {
            errors.email.push(FieldError::new("required", "Email is required."));
        } else if email.len() < EMAIL_MIN_LEN || email.len() > EMAIL_MAX_LEN || !email.contains('@') {
            errors.email.push(FieldError::new("email", "Enter a valid email address."));
        }

        if password.len() < PASSWORD_MIN_LEN {
            errors.password.push(FieldError::new(
                "min",
                format!("Password must be at least {PASSWORD_MIN_LEN} characters."),
            ));
        } else if password.len() > PASSWORD_MAX_LEN {
            errors.password.push(FieldError::new(
                "max",
                format!("Password must be at most {PASSWORD_MAX_LEN} characters."),
            ));
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Self { email: email.to_string(), password: password.to_string() })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticated identity handed back to callers. Carries nothing sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
}

/// Persisted user as seen by the service layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub verified: bool,
}

/// Persisted email verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationKey {
    pub id: i32,
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl VerificationKey {
    /// A key is expired once `created_at + lifetime` lies before `now`.
    pub fn is_expired(&self, lifetime: Duration, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.created_at).to_std() {
            Ok(age) => age > lifetime,
            // created_at in the future: clock skew between app and database
            Err(_) => false,
        }
    }
}
