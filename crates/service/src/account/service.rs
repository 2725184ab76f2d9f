use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::field::display;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use super::domain::{NewUser, User, VerificationKey};
use super::errors::AccountError;
use super::hashing::{HashError, PasswordHasher};
use super::mailer::VerificationMailer;
use super::repository::{UserQueries, UserStore, UserTransaction};
use super::token::TokenGenerator;

/// Account service configuration
#[derive(Debug, Clone, Copy)]
pub struct AccountConfig {
    /// How long a verification token stays valid after it is issued.
    pub token_lifetime: Duration,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self { token_lifetime: Duration::from_secs(15 * 60) }
    }
}

/// Registration, email verification and login, independent of any transport.
///
/// Internal failures are logged at `error` here, once, with the operation
/// name; callers only need to map them to a generic response.
pub struct AccountService<S: UserStore> {
    store: Arc<S>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenGenerator>,
    mailer: VerificationMailer,
    cfg: AccountConfig,
}

enum Registration {
    Created(Uuid),
    Duplicate,
}

impl<S: UserStore> AccountService<S> {
    pub fn new(
        store: Arc<S>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenGenerator>,
        mailer: VerificationMailer,
        cfg: AccountConfig,
    ) -> Self {
        Self { store, hasher, tokens, mailer, cfg }
    }

    /// Check a login attempt against verified accounts.
    ///
    /// Unknown, unverified and wrong-password attempts all return
    /// [`AccountError::InvalidCredentials`], and all of them pay for one hash
    /// comparison.
    #[instrument(skip_all, fields(user_id = tracing::field::Empty))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AccountError> {
        let result = self.try_authenticate(email.trim(), password).await;
        log_failure("authenticate", &result);
        result
    }

    async fn try_authenticate(&self, email: &str, password: &str) -> Result<User, AccountError> {
        let user = self
            .store
            .get_verified_user_by_email(email)
            .await
            .map_err(|e| AccountError::repository("looking up user by email", e))?;

        let Some(user) = user else {
            let _ = self
                .with_hasher(|h| {
                    h.dummy_compare();
                    Ok(())
                })
                .await;
            debug!("no verified user for email");
            return Err(AccountError::InvalidCredentials);
        };
        Span::current().record("user_id", display(user.id));

        let (password, stored) = (password.to_string(), user.password_hash);
        let matched = self
            .with_hasher(move |h| h.compare(&password, &stored))
            .await
            .map_err(|source| match source {
                HashError::Malformed(_) => AccountError::CorruptHash { user_id: user.id, source },
                other => AccountError::Hash(other),
            })?;
        if !matched {
            debug!("password mismatch");
            return Err(AccountError::InvalidCredentials);
        }

        Ok(User { id: user.id })
    }

    /// Create an unverified account and email a verification link.
    ///
    /// If the address already belongs to a verified account nothing is
    /// stored; the owner is notified instead and the call still succeeds.
    ///
    /// # Examples
    /// ```
    /// use std::{sync::Arc, time::Duration};
    /// use service::account::domain::NewUser;
    /// use service::account::hashing::mock::PlainHasher;
    /// use service::account::mailer::{mock::RecordingMailer, VerificationMailer};
    /// use service::account::repository::mock::MockUserStore;
    /// use service::account::service::{AccountConfig, AccountService};
    /// use service::account::token::mock::SequentialTokens;
    ///
    /// let store = Arc::new(MockUserStore::default());
    /// let outbox = Arc::new(RecordingMailer::default());
    /// let mailer = VerificationMailer::new(
    ///     outbox.clone(),
    ///     "http://localhost:8080".parse().unwrap(),
    ///     "no-reply@localhost",
    ///     Duration::from_secs(5),
    /// ).unwrap();
    /// let svc = AccountService::new(
    ///     store.clone(),
    ///     Arc::new(PlainHasher::default()),
    ///     Arc::new(SequentialTokens::default()),
    ///     mailer,
    ///     AccountConfig::default(),
    /// );
    ///
    /// let new_user = NewUser::parse("user@example.com", "longenough").unwrap();
    /// tokio_test::block_on(svc.register(new_user)).unwrap();
    /// assert_eq!(store.users().len(), 1);
    /// assert_eq!(outbox.sent()[0].verification_token().as_deref(), Some("token-1"));
    /// ```
    #[instrument(skip_all, fields(user_id = tracing::field::Empty))]
    pub async fn register(&self, new_user: NewUser) -> Result<(), AccountError> {
        let result = self.try_register(new_user).await;
        log_failure("register", &result);
        result
    }

    async fn try_register(&self, new_user: NewUser) -> Result<(), AccountError> {
        let password = new_user.password().to_string();
        let hash = self.with_hasher(move |h| h.hash(&password)).await.map_err(AccountError::Hash)?;

        let tx = self
            .store
            .begin()
            .await
            .map_err(|e| AccountError::repository("beginning registration transaction", e))?;

        match self.register_in(&tx, new_user.email(), &hash).await {
            Ok(Registration::Created(user_id)) => {
                tx.commit()
                    .await
                    .map_err(|e| AccountError::repository(format!("committing registration of user {user_id}"), e))?;
                info!(%user_id, "registered user");
                Ok(())
            }
            Ok(Registration::Duplicate) => {
                debug!("duplicate registration");
                tx.rollback()
                    .await
                    .map_err(|e| AccountError::repository("rolling back duplicate registration", e))
            }
            Err(cause) => Err(abort(tx, cause).await),
        }
    }

    async fn register_in(&self, tx: &S::Transaction, email: &str, hash: &str) -> Result<Registration, AccountError> {
        let taken = tx
            .verified_email_exists(email)
            .await
            .map_err(|e| AccountError::repository("checking for verified email", e))?;
        if taken {
            self.mailer
                .duplicate_registration(email)
                .await
                .map_err(AccountError::Notification)?;
            return Ok(Registration::Duplicate);
        }

        let user_id = Uuid::new_v4();
        Span::current().record("user_id", display(user_id));
        tx.insert_user(user_id, email, hash)
            .await
            .map_err(|e| AccountError::repository(format!("inserting user {user_id}"), e))?;

        let token = self.tokens.generate();
        tx.insert_verification_key(user_id, email, &token)
            .await
            .map_err(|e| AccountError::repository(format!("inserting verification key for user {user_id}"), e))?;

        self.mailer
            .new_email(email, &token)
            .await
            .map_err(AccountError::Notification)?;

        Ok(Registration::Created(user_id))
    }

    /// Redeem a verification token.
    ///
    /// Unknown and expired tokens both yield [`AccountError::InvalidToken`].
    /// On success the owning user is verified, other unverified registrations
    /// of the same address are removed, and the key is deleted afterwards.
    #[instrument(skip_all, fields(key_id = tracing::field::Empty, user_id = tracing::field::Empty))]
    pub async fn verify_email(&self, token: &str) -> Result<(), AccountError> {
        let result = self.try_verify_email(token).await;
        log_failure("verify_email", &result);
        result
    }

    async fn try_verify_email(&self, token: &str) -> Result<(), AccountError> {
        let key = self
            .store
            .get_verification_key_by_token(token)
            .await
            .map_err(|e| AccountError::repository("looking up verification key", e))?;

        let Some(key) = key else {
            debug!("token not found");
            return Err(AccountError::InvalidToken);
        };
        let span = Span::current();
        span.record("key_id", key.id);
        span.record("user_id", display(key.user_id));
        if key.is_expired(self.cfg.token_lifetime, Utc::now()) {
            debug!("token expired");
            return Err(AccountError::InvalidToken);
        }

        let tx = self
            .store
            .begin()
            .await
            .map_err(|e| AccountError::repository(format!("beginning verification of user {}", key.user_id), e))?;

        let pruned = match confirm_in(&tx, &key).await {
            Ok(pruned) => pruned,
            Err(cause) => return Err(abort(tx, cause).await),
        };
        tx.commit()
            .await
            .map_err(|e| AccountError::repository(format!("committing verification of user {}", key.user_id), e))?;
        info!(pruned, "verified email");

        if let Err(source) = self.store.delete_verification_key_by_id(key.id).await {
            warn!(error = %source, "failed to delete used verification key");
            return Err(AccountError::KeyCleanup { key_id: key.id, source });
        }
        Ok(())
    }

    /// Run a hasher call on the blocking pool; Argon2 would otherwise stall a
    /// runtime worker for the whole derivation.
    async fn with_hasher<T, F>(&self, f: F) -> Result<T, HashError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PasswordHasher) -> Result<T, HashError> + Send + 'static,
    {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || f(hasher.as_ref()))
            .await
            .map_err(|e| HashError::Failed(format!("hashing task: {e}")))?
    }
}

async fn confirm_in<T: UserQueries>(tx: &T, key: &VerificationKey) -> Result<u64, AccountError> {
    tx.mark_email_verified(key.user_id)
        .await
        .map_err(|e| AccountError::repository(format!("marking user {} verified", key.user_id), e))?;
    tx.delete_unverified_users_by_email(&key.email)
        .await
        .map_err(|e| AccountError::repository(format!("deleting unverified duplicates of user {}", key.user_id), e))
}

/// Roll back after `cause`, folding a rollback failure into the result.
async fn abort<T: UserTransaction>(tx: T, cause: AccountError) -> AccountError {
    match tx.rollback().await {
        Ok(()) => {
            debug!(error = %cause, "rolled back");
            cause
        }
        Err(rollback) => AccountError::RollbackFailed { cause: Box::new(cause), rollback },
    }
}

/// Internal failures get one `error` event; expected outcomes and the
/// already-warned key cleanup do not.
fn log_failure<T>(operation: &'static str, result: &Result<T, AccountError>) {
    match result {
        Err(AccountError::KeyCleanup { .. }) => {}
        Err(err) if err.is_internal() => {
            error!(operation, code = err.code(), error = %err, "account operation failed");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::domain::UserRecord;
    use crate::account::hashing::mock::{PlainHasher, DUMMY_HASH};
    use crate::account::mailer::mock::RecordingMailer;
    use crate::account::mailer::{DUPLICATE_SUBJECT, VERIFY_SUBJECT};
    use crate::account::repository::mock::MockUserStore;
    use crate::account::token::mock::SequentialTokens;

    struct Fixture {
        svc: AccountService<MockUserStore>,
        store: Arc<MockUserStore>,
        hasher: Arc<PlainHasher>,
        outbox: Arc<RecordingMailer>,
    }

    fn fixture_with(hasher: PlainHasher) -> Fixture {
        let store = Arc::new(MockUserStore::default());
        let hasher = Arc::new(hasher);
        let outbox = Arc::new(RecordingMailer::default());
        let mailer = VerificationMailer::new(
            outbox.clone(),
            "http://localhost:8080".parse().unwrap(),
            "no-reply@localhost",
            Duration::from_secs(5),
        )
        .unwrap();
        let svc = AccountService::new(
            store.clone(),
            hasher.clone(),
            Arc::new(SequentialTokens::default()),
            mailer,
            AccountConfig::default(),
        );
        Fixture { svc, store, hasher, outbox }
    }

    fn fixture() -> Fixture {
        fixture_with(PlainHasher::default())
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Route this thread's events into a buffer until the guard drops.
    fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
        let logs = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    fn new_user(email: &str) -> NewUser {
        NewUser::parse(email, "longenough").unwrap()
    }

    async fn register_and_verify(f: &Fixture, email: &str) -> Uuid {
        f.svc.register(new_user(email)).await.unwrap();
        let token = f.outbox.sent().last().and_then(|m| m.verification_token()).unwrap();
        f.svc.verify_email(&token).await.unwrap();
        f.store.users().into_iter().find(|u| u.email == email && u.verified).unwrap().id
    }

    #[tokio::test]
    async fn register_stores_unverified_user_and_key() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();

        let users = f.store.users();
        assert_eq!(users.len(), 1);
        assert!(!users[0].verified);
        assert_eq!(users[0].password_hash, "plain$0$longenough");

        let keys = f.store.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].user_id, users[0].id);
        assert_eq!(keys[0].token, "token-1");

        let sent = f.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, VERIFY_SUBJECT);
        assert!(sent[0].body.contains("http://localhost:8080/verify-email/token-1"));
        assert_eq!((f.store.commits(), f.store.rollbacks()), (1, 0));
    }

    #[tokio::test]
    async fn duplicate_registration_notifies_owner_and_stores_nothing() {
        let f = fixture();
        register_and_verify(&f, "a@example.com").await;
        let users_before = f.store.users();

        f.svc.register(new_user("a@example.com")).await.unwrap();

        assert_eq!(f.store.users(), users_before);
        let last = f.outbox.sent().pop().unwrap();
        assert_eq!(last.subject, DUPLICATE_SUBJECT);
        assert_eq!(last.to, "a@example.com");
        assert_eq!(f.store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn unverified_registrations_may_repeat() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        assert_eq!(f.store.users().len(), 2);
        assert_eq!(f.outbox.sent().iter().filter(|m| m.subject == VERIFY_SUBJECT).count(), 2);
    }

    #[tokio::test]
    async fn hashing_failure_aborts_before_any_transaction() {
        let f = fixture_with(PlainHasher::failing());
        let err = f.svc.register(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, AccountError::Hash(_)));
        assert_eq!(f.store.begins(), 0);
        assert!(f.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn begin_failure_is_internal() {
        let f = fixture();
        f.store.fail_begin(true);
        let err = f.svc.register(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, AccountError::Repository { .. }));
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn failed_step_rolls_back_registration() {
        for op in ["verified_email_exists", "insert_user", "insert_verification_key"] {
            let f = fixture();
            f.store.fail_on(op);
            let err = f.svc.register(new_user("a@example.com")).await.unwrap_err();
            assert!(matches!(err, AccountError::Repository { .. }), "{op}: {err}");
            assert!(f.store.users().is_empty(), "{op}");
            assert_eq!((f.store.commits(), f.store.rollbacks()), (0, 1), "{op}");
            assert!(f.outbox.sent().is_empty(), "{op}");
        }
    }

    #[tokio::test]
    async fn mail_failure_rolls_back_registration() {
        let f = fixture();
        f.outbox.set_failing(true);
        let err = f.svc.register(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, AccountError::Notification(_)));
        assert!(f.store.users().is_empty());
        assert!(f.store.keys().is_empty());
        assert_eq!(f.store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn duplicate_notice_failure_is_reported() {
        let f = fixture();
        register_and_verify(&f, "a@example.com").await;
        f.outbox.set_failing(true);
        let err = f.svc.register(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, AccountError::Notification(_)));
    }

    #[tokio::test]
    async fn rollback_failure_carries_both_errors() {
        let f = fixture();
        f.store.fail_on("insert_user");
        f.store.fail_rollback(true);
        let err = f.svc.register(new_user("a@example.com")).await.unwrap_err();
        match &err {
            AccountError::RollbackFailed { cause, rollback } => {
                assert!(matches!(**cause, AccountError::Repository { .. }));
                assert!(rollback.to_string().contains("rollback"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("insert_user") && msg.contains("rollback"), "{msg}");
    }

    #[tokio::test]
    async fn commit_failure_persists_nothing() {
        let f = fixture();
        f.store.fail_commit(true);
        let err = f.svc.register(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, AccountError::Repository { .. }));
        assert!(f.store.users().is_empty());
        assert_eq!(f.store.rollbacks(), 0);
    }

    #[tokio::test]
    async fn verify_marks_user_and_prunes_duplicates() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        f.svc.register(new_user("other@example.com")).await.unwrap();
        assert_eq!(f.store.keys().len(), 3);

        f.svc.verify_email("token-2").await.unwrap();

        let users = f.store.users();
        assert_eq!(users.len(), 2);
        let verified: Vec<&UserRecord> = users.iter().filter(|u| u.verified).collect();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].email, "a@example.com");
        assert!(users.iter().any(|u| u.email == "other@example.com" && !u.verified));
        // consumed key deleted, the pruned user's key went with it
        let keys = f.store.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].token, "token-3");
    }

    #[tokio::test]
    async fn unknown_and_expired_tokens_look_the_same() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        let user_id = f.store.users()[0].id;
        let stale = Utc::now() - chrono::Duration::minutes(16);
        f.store.insert_key_created_at(user_id, "a@example.com", "stale", stale).unwrap();

        let unknown = f.svc.verify_email("nope").await.unwrap_err();
        let expired = f.svc.verify_email("stale").await.unwrap_err();
        let empty = f.svc.verify_email("").await.unwrap_err();
        assert!(matches!(unknown, AccountError::InvalidToken));
        assert!(matches!(expired, AccountError::InvalidToken));
        assert!(matches!(empty, AccountError::InvalidToken));
        assert_eq!(unknown.to_string(), expired.to_string());
        assert!(!f.store.users()[0].verified);
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        f.svc.verify_email("token-1").await.unwrap();
        let err = f.svc.verify_email("token-1").await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidToken));
    }

    #[tokio::test]
    async fn failed_verification_commit_leaves_user_unverified() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        f.store.fail_commit(true);
        let err = f.svc.verify_email("token-1").await.unwrap_err();
        assert!(matches!(err, AccountError::Repository { .. }));
        assert!(!f.store.users()[0].verified);
        assert_eq!(f.store.keys().len(), 1);
    }

    #[tokio::test]
    async fn failed_prune_rolls_back_verification() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        f.store.fail_on("delete_unverified_users_by_email");
        let err = f.svc.verify_email("token-1").await.unwrap_err();
        assert!(matches!(err, AccountError::Repository { .. }));
        assert!(!f.store.users()[0].verified);
        assert_eq!(f.store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn pruned_registration_loses_its_token() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        let first = f.store.users()[0].id;
        f.svc.verify_email("token-2").await.unwrap();
        assert!(f.store.users().iter().all(|u| u.id != first));
        let err = f.svc.verify_email("token-1").await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidToken));
    }

    #[tokio::test]
    async fn key_cleanup_failure_keeps_verification() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        f.store.fail_on("delete_verification_key_by_id");
        let err = f.svc.verify_email("token-1").await.unwrap_err();
        match err {
            AccountError::KeyCleanup { key_id, .. } => assert_eq!(key_id, f.store.keys()[0].id),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.store.users()[0].verified);
    }

    #[tokio::test]
    async fn authenticate_verified_user() {
        let f = fixture();
        let id = register_and_verify(&f, "a@example.com").await;
        let user = f.svc.authenticate("  a@example.com ", "longenough").await.unwrap();
        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn failed_logins_are_indistinguishable() {
        let f = fixture();
        register_and_verify(&f, "a@example.com").await;
        f.svc.register(new_user("pending@example.com")).await.unwrap();

        let wrong_password = f.svc.authenticate("a@example.com", "wrongpassword").await.unwrap_err();
        let unknown = f.svc.authenticate("nobody@example.com", "longenough").await.unwrap_err();
        let unverified = f.svc.authenticate("pending@example.com", "longenough").await.unwrap_err();
        for err in [&wrong_password, &unknown, &unverified] {
            assert!(matches!(err, AccountError::InvalidCredentials));
            assert!(!err.is_internal());
        }
    }

    #[tokio::test]
    async fn unknown_user_still_runs_a_comparison() {
        let f = fixture();
        let err = f.svc.authenticate("nobody@example.com", "longenough").await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidCredentials));
        assert_eq!(f.hasher.compared_hashes(), vec![DUMMY_HASH.to_string()]);
    }

    #[tokio::test]
    async fn corrupt_stored_hash_is_internal() {
        let f = fixture();
        let id = Uuid::new_v4();
        f.store.insert_user_record(UserRecord {
            id,
            email: "a@example.com".into(),
            password_hash: "garbage".into(),
            verified: true,
        });
        let err = f.svc.authenticate("a@example.com", "longenough").await.unwrap_err();
        match err {
            AccountError::CorruptHash { user_id, .. } => assert_eq!(user_id, id),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookup_failure_is_internal() {
        let f = fixture();
        f.store.fail_on("get_verified_user_by_email");
        let err = f.svc.authenticate("a@example.com", "longenough").await.unwrap_err();
        assert!(err.is_internal());
        assert!(f.hasher.compared_hashes().is_empty());
    }

    #[tokio::test]
    async fn internal_registration_failure_is_logged_with_user_id() {
        let f = fixture();
        f.store.fail_on("insert_verification_key");
        let (logs, _guard) = capture_logs();

        let err = f.svc.register(new_user("a@example.com")).await.unwrap_err();

        let logs = logs.contents();
        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("account operation failed"), "{logs}");
        assert!(logs.contains("register"), "{logs}");
        assert!(logs.contains("user_id="), "{logs}");
        assert!(logs.contains("inserting verification key for user"), "{logs}");
        assert!(err.to_string().contains("inserting verification key for user"));
    }

    #[tokio::test]
    async fn failed_verification_commit_is_logged_with_ids() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        let user_id = f.store.users()[0].id;
        let key_id = f.store.keys()[0].id;
        f.store.fail_commit(true);
        let (logs, _guard) = capture_logs();

        let err = f.svc.verify_email("token-1").await.unwrap_err();

        assert!(err.to_string().contains(&user_id.to_string()), "{err}");
        let logs = logs.contents();
        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains(&format!("key_id={key_id}")), "{logs}");
        assert!(logs.contains(&format!("user_id={user_id}")), "{logs}");
    }

    #[tokio::test]
    async fn failed_prune_names_the_user() {
        let f = fixture();
        f.svc.register(new_user("a@example.com")).await.unwrap();
        let user_id = f.store.users()[0].id;
        f.store.fail_on("mark_email_verified");
        let err = f.svc.verify_email("token-1").await.unwrap_err();
        assert!(err.to_string().contains(&format!("marking user {user_id} verified")), "{err}");
    }

    #[tokio::test]
    async fn expected_outcomes_are_not_logged_as_errors() {
        let f = fixture();
        let (logs, _guard) = capture_logs();
        let _ = f.svc.authenticate("nobody@example.com", "longenough").await;
        let _ = f.svc.verify_email("nope").await;
        let logs = logs.contents();
        assert!(!logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("token not found"), "{logs}");
    }

    struct PanickingHasher;

    impl PasswordHasher for PanickingHasher {
        fn hash(&self, _password: &str) -> Result<String, HashError> {
            panic!("hasher failure");
        }

        fn compare(&self, _password: &str, _hash: &str) -> Result<bool, HashError> {
            panic!("hasher failure");
        }

        fn dummy_compare(&self) {}
    }

    #[tokio::test]
    async fn hashing_runs_on_the_blocking_pool() {
        let outbox = Arc::new(RecordingMailer::default());
        let mailer = VerificationMailer::new(outbox, "http://localhost:8080".parse().unwrap(), "s@x", Duration::from_secs(5)).unwrap();
        let store = Arc::new(MockUserStore::default());
        store.insert_user_record(UserRecord {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            password_hash: "whatever".into(),
            verified: true,
        });
        let svc = AccountService::new(
            store.clone(),
            Arc::new(PanickingHasher),
            Arc::new(SequentialTokens::default()),
            mailer,
            AccountConfig::default(),
        );

        // a panic inside the hasher surfaces as a join failure, not a crashed worker
        let err = svc.authenticate("a@example.com", "longenough").await.unwrap_err();
        assert!(matches!(err, AccountError::Hash(HashError::Failed(_))), "{err:?}");
        let err = svc.register(new_user("b@example.com")).await.unwrap_err();
        assert!(matches!(err, AccountError::Hash(HashError::Failed(_))), "{err:?}");
        assert_eq!(store.begins(), 0);
    }
}
