use async_trait::async_trait;
use uuid::Uuid;

use super::domain::{UserRecord, VerificationKey};
use super::errors::RepositoryError;

/// Queries the account workflows run, either against the pool or inside an
/// open transaction.
#[async_trait]
pub trait UserQueries: Send + Sync {
    async fn verified_email_exists(&self, email: &str) -> Result<bool, RepositoryError>;
    async fn insert_user(&self, id: Uuid, email: &str, password_hash: &str) -> Result<UserRecord, RepositoryError>;
    async fn insert_verification_key(&self, user_id: Uuid, email: &str, token: &str) -> Result<VerificationKey, RepositoryError>;
    async fn get_verification_key_by_token(&self, token: &str) -> Result<Option<VerificationKey>, RepositoryError>;
    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), RepositoryError>;
    /// Returns how many users were removed.
    async fn delete_unverified_users_by_email(&self, email: &str) -> Result<u64, RepositoryError>;
    async fn delete_verification_key_by_id(&self, id: i32) -> Result<(), RepositoryError>;
    async fn get_verified_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepositoryError>;
}

/// An open transaction. Both ends consume it, so a committed transaction can
/// never be rolled back.
#[async_trait]
pub trait UserTransaction: UserQueries + Sized {
    async fn commit(self) -> Result<(), RepositoryError>;
    async fn rollback(self) -> Result<(), RepositoryError>;
}

/// Persistence gateway: pooled queries plus transactions.
#[async_trait]
pub trait UserStore: UserQueries {
    type Transaction: UserTransaction;

    async fn begin(&self) -> Result<Self::Transaction, RepositoryError>;
}

/// In-memory store for tests and doc examples.
///
/// Transactions work on a private copy of the data that replaces the shared
/// state on commit and is discarded on rollback or drop. Concurrent
/// transactions are not isolated from each other: the last commit wins.
/// Individual operations can be made to fail.
pub mod mock {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    struct State {
        users: Vec<UserRecord>,
        keys: Vec<VerificationKey>,
        next_key_id: i32,
    }

    impl State {
        fn verified_email_exists(&self, email: &str) -> bool {
            self.users.iter().any(|u| u.verified && u.email == email)
        }

        fn insert_user(&mut self, id: Uuid, email: &str, password_hash: &str) -> Result<UserRecord, RepositoryError> {
            if self.users.iter().any(|u| u.id == id) {
                return Err(RepositoryError::Db(format!("duplicate key value: users.id = {id}")));
            }
            let user = UserRecord { id, email: email.to_string(), password_hash: password_hash.to_string(), verified: false };
            self.users.push(user.clone());
            Ok(user)
        }

        fn insert_key(&mut self, user_id: Uuid, email: &str, token: &str, created_at: DateTime<Utc>) -> Result<VerificationKey, RepositoryError> {
            if token.is_empty() {
                return Err(RepositoryError::Invalid("token required".into()));
            }
            if !self.users.iter().any(|u| u.id == user_id) {
                return Err(RepositoryError::Db(format!("foreign key violation: no user {user_id}")));
            }
            if self.keys.iter().any(|k| k.token == token) {
                return Err(RepositoryError::Db("duplicate key value: email_verification_keys.token".into()));
            }
            self.next_key_id += 1;
            let key = VerificationKey {
                id: self.next_key_id,
                user_id,
                email: email.to_string(),
                token: token.to_string(),
                created_at,
            };
            self.keys.push(key.clone());
            Ok(key)
        }

        fn mark_email_verified(&mut self, user_id: Uuid) -> Result<(), RepositoryError> {
            let Some(pos) = self.users.iter().position(|u| u.id == user_id) else {
                return Ok(());
            };
            if self.users[pos].verified {
                return Ok(());
            }
            let email = self.users[pos].email.clone();
            if self.verified_email_exists(&email) {
                return Err(RepositoryError::Db("duplicate key value violates uniq_users_verified_email".into()));
            }
            self.users[pos].verified = true;
            Ok(())
        }

        fn delete_unverified_users_by_email(&mut self, email: &str) -> u64 {
            let doomed: HashSet<Uuid> = self.users.iter().filter(|u| !u.verified && u.email == email).map(|u| u.id).collect();
            self.users.retain(|u| !doomed.contains(&u.id));
            // keys follow their user (ON DELETE CASCADE)
            self.keys.retain(|k| !doomed.contains(&k.user_id));
            doomed.len() as u64
        }
    }

    #[derive(Default)]
    struct Controls {
        fail_begin: AtomicBool,
        fail_commit: AtomicBool,
        fail_rollback: AtomicBool,
        failing_ops: Mutex<HashSet<&'static str>>,
        begins: AtomicUsize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    impl Controls {
        fn check(&self, op: &'static str) -> Result<(), RepositoryError> {
            if self.failing_ops.lock().unwrap_or_else(|e| e.into_inner()).contains(op) {
                return Err(RepositoryError::Db(format!("injected failure in {op}")));
            }
            Ok(())
        }
    }

    fn lock(state: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
        state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[derive(Clone, Default)]
    pub struct MockUserStore {
        state: Arc<Mutex<State>>,
        controls: Arc<Controls>,
    }

    impl MockUserStore {
        pub fn fail_begin(&self, fail: bool) {
            self.controls.fail_begin.store(fail, Ordering::SeqCst);
        }

        pub fn fail_commit(&self, fail: bool) {
            self.controls.fail_commit.store(fail, Ordering::SeqCst);
        }

        pub fn fail_rollback(&self, fail: bool) {
            self.controls.fail_rollback.store(fail, Ordering::SeqCst);
        }

        /// Make the named query (e.g. `"insert_user"`) fail, in or out of a
        /// transaction.
        pub fn fail_on(&self, op: &'static str) {
            self.controls.failing_ops.lock().unwrap_or_else(|e| e.into_inner()).insert(op);
        }

        pub fn clear_failures(&self) {
            self.fail_begin(false);
            self.fail_commit(false);
            self.fail_rollback(false);
            self.controls.failing_ops.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }

        pub fn begins(&self) -> usize {
            self.controls.begins.load(Ordering::SeqCst)
        }

        pub fn commits(&self) -> usize {
            self.controls.commits.load(Ordering::SeqCst)
        }

        pub fn rollbacks(&self) -> usize {
            self.controls.rollbacks.load(Ordering::SeqCst)
        }

        pub fn users(&self) -> Vec<UserRecord> {
            lock(&self.state).users.clone()
        }

        pub fn keys(&self) -> Vec<VerificationKey> {
            lock(&self.state).keys.clone()
        }

        /// Seed a user directly, bypassing transactions.
        pub fn insert_user_record(&self, user: UserRecord) {
            lock(&self.state).users.push(user);
        }

        /// Seed a key with an explicit creation time.
        pub fn insert_key_created_at(&self, user_id: Uuid, email: &str, token: &str, created_at: DateTime<Utc>) -> Result<VerificationKey, RepositoryError> {
            lock(&self.state).insert_key(user_id, email, token, created_at)
        }
    }

    /// Shared query implementation over whichever state a handle points at.
    fn run<T>(controls: &Controls, state: &Mutex<State>, op: &'static str, f: impl FnOnce(&mut State) -> Result<T, RepositoryError>) -> Result<T, RepositoryError> {
        controls.check(op)?;
        let mut guard = lock(state);
        f(&mut guard)
    }

    macro_rules! impl_queries {
        ($ty:ty, $state:ident) => {
            #[async_trait]
            impl UserQueries for $ty {
                async fn verified_email_exists(&self, email: &str) -> Result<bool, RepositoryError> {
                    run(&self.controls, &self.$state, "verified_email_exists", |s| Ok(s.verified_email_exists(email)))
                }

                async fn insert_user(&self, id: Uuid, email: &str, password_hash: &str) -> Result<UserRecord, RepositoryError> {
                    run(&self.controls, &self.$state, "insert_user", |s| s.insert_user(id, email, password_hash))
                }

                async fn insert_verification_key(&self, user_id: Uuid, email: &str, token: &str) -> Result<VerificationKey, RepositoryError> {
                    run(&self.controls, &self.$state, "insert_verification_key", |s| s.insert_key(user_id, email, token, Utc::now()))
                }

                async fn get_verification_key_by_token(&self, token: &str) -> Result<Option<VerificationKey>, RepositoryError> {
                    run(&self.controls, &self.$state, "get_verification_key_by_token", |s| {
                        Ok(s.keys.iter().find(|k| k.token == token).cloned())
                    })
                }

                async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), RepositoryError> {
                    run(&self.controls, &self.$state, "mark_email_verified", |s| s.mark_email_verified(user_id))
                }

                async fn delete_unverified_users_by_email(&self, email: &str) -> Result<u64, RepositoryError> {
                    run(&self.controls, &self.$state, "delete_unverified_users_by_email", |s| {
                        Ok(s.delete_unverified_users_by_email(email))
                    })
                }

                async fn delete_verification_key_by_id(&self, id: i32) -> Result<(), RepositoryError> {
                    run(&self.controls, &self.$state, "delete_verification_key_by_id", |s| {
                        s.keys.retain(|k| k.id != id);
                        Ok(())
                    })
                }

                async fn get_verified_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepositoryError> {
                    run(&self.controls, &self.$state, "get_verified_user_by_email", |s| {
                        Ok(s.users.iter().find(|u| u.verified && u.email == email).cloned())
                    })
                }
            }
        };
    }

    impl_queries!(MockUserStore, state);
    impl_queries!(MockTransaction, staged);

    pub struct MockTransaction {
        staged: Mutex<State>,
        parent: Arc<Mutex<State>>,
        controls: Arc<Controls>,
    }

    #[async_trait]
    impl UserStore for MockUserStore {
        type Transaction = MockTransaction;

        async fn begin(&self) -> Result<MockTransaction, RepositoryError> {
            if self.controls.fail_begin.load(Ordering::SeqCst) {
                return Err(RepositoryError::Db("injected failure in begin".into()));
            }
            self.controls.begins.fetch_add(1, Ordering::SeqCst);
            let snapshot = lock(&self.state).clone();
            Ok(MockTransaction {
                staged: Mutex::new(snapshot),
                parent: Arc::clone(&self.state),
                controls: Arc::clone(&self.controls),
            })
        }
    }

    #[async_trait]
    impl UserTransaction for MockTransaction {
        async fn commit(self) -> Result<(), RepositoryError> {
            if self.controls.fail_commit.load(Ordering::SeqCst) {
                return Err(RepositoryError::Db("injected failure in commit".into()));
            }
            let staged = self.staged.into_inner().unwrap_or_else(|e| e.into_inner());
            *lock(&self.parent) = staged;
            self.controls.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(self) -> Result<(), RepositoryError> {
            self.controls.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.controls.fail_rollback.load(Ordering::SeqCst) {
                return Err(RepositoryError::Db("injected failure in rollback".into()));
            }
            Ok(())
        }
    }
}
