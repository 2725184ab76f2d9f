//! Outgoing email: the gateway contract, a console implementation for
//! development, and the verification messages built on top of it.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("writing message: {0}")]
    Io(#[from] io::Error),
    #[error("send did not complete within {0:?}")]
    Timeout(Duration),
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("base url {0:?} cannot carry a path")]
    InvalidBaseUrl(String),
}

/// Notification gateway.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, from: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Writes each message to a stream instead of delivering it. Intended for
/// development.
pub struct ConsoleMailer {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleMailer {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Mutex::new(Box::new(out)) }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, to: &str, from: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message_separator = "*".repeat(80);
        let body_separator = "-".repeat(80);
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        write!(out, "\n\n{message_separator}\n")?;
        writeln!(out, "To: {to}")?;
        writeln!(out, "From: {from}")?;
        writeln!(out, "Subject: {subject}")?;
        writeln!(out, "{body_separator}")?;
        writeln!(out, "{body}")?;
        writeln!(out, "{message_separator}")?;
        out.flush()?;
        Ok(())
    }
}

pub const VERIFY_EMAIL_PATH: &str = "verify-email";
pub const VERIFY_SUBJECT: &str = "Verify Your Email";
pub const DUPLICATE_SUBJECT: &str = "Duplicate Registration";

/// Renders and sends the two messages the registration flow needs. Every send
/// is bounded by `timeout`.
#[derive(Clone)]
pub struct VerificationMailer {
    mailer: Arc<dyn Mailer>,
    base_url: Url,
    sender: String,
    timeout: Duration,
}

impl VerificationMailer {
    pub fn new(mailer: Arc<dyn Mailer>, base_url: Url, sender: impl Into<String>, timeout: Duration) -> Result<Self, MailError> {
        if base_url.cannot_be_a_base() {
            return Err(MailError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self { mailer, base_url, sender: sender.into(), timeout })
    }

    /// `<base_url>/verify-email/<token>`, keeping any path prefix on the base.
    pub fn verification_link(&self, token: &str) -> String {
        let mut link = self.base_url.clone();
        if let Ok(mut segments) = link.path_segments_mut() {
            segments.pop_if_empty().push(VERIFY_EMAIL_PATH).push(token);
        }
        link.into()
    }

    pub async fn new_email(&self, to: &str, token: &str) -> Result<(), MailError> {
        let link = self.verification_link(token);
        let body = format!(
            "Thanks for signing up!\n\n\
             Confirm your email address by opening this link:\n\n\
             {link}\n\n\
             The link expires shortly and can only be used once. If you did not \
             create an account, you can ignore this message."
        );
        self.deliver(to, VERIFY_SUBJECT, &body).await
    }

    pub async fn duplicate_registration(&self, to: &str) -> Result<(), MailError> {
        let body = "Someone tried to create a new account with this email address, \
                    but it already belongs to a verified account.\n\n\
                    If this was you, sign in with your existing password. \
                    If not, no action is needed; your account has not changed.";
        self.deliver(to, DUPLICATE_SUBJECT, body).await
    }

    async fn deliver(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        debug!(subject, "sending notification");
        tokio::time::timeout(self.timeout, self.mailer.send(to, &self.sender, subject, body))
            .await
            .map_err(|_| MailError::Timeout(self.timeout))?
    }
}

pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentEmail {
        pub to: String,
        pub from: String,
        pub subject: String,
        pub body: String,
    }

    impl SentEmail {
        /// Token from the first verification link in the body, if any.
        pub fn verification_token(&self) -> Option<String> {
            let marker = format!("/{VERIFY_EMAIL_PATH}/");
            let start = self.body.find(&marker)? + marker.len();
            let token: String = self.body[start..].chars().take_while(|c| !c.is_whitespace()).collect();
            (!token.is_empty()).then_some(token)
        }
    }

    /// Captures messages in memory; can be told to fail or stall.
    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<SentEmail>>,
        fail: AtomicBool,
        delay: Mutex<Option<Duration>>,
    }

    impl RecordingMailer {
        pub fn sent(&self) -> Vec<SentEmail> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, from: &str, subject: &str, body: &str) -> Result<(), MailError> {
            let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(MailError::Rejected("mailer configured to fail".into()));
            }
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(SentEmail {
                to: to.to_string(),
                from: from.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
            Ok(())
        }
    }
}
