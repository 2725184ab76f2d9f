use chrono::Utc;
use sea_orm::{DatabaseConnection, DatabaseTransaction, ConnectionTrait, TransactionTrait};
use uuid::Uuid;

use crate::account::domain::{UserRecord, VerificationKey};
use crate::account::errors::RepositoryError;
use crate::account::repository::{UserQueries, UserStore, UserTransaction};

/// SeaORM-backed persistence. `C` is the pool for top-level queries and
/// [`DatabaseTransaction`] for the handle returned by [`UserStore::begin`].
pub struct SeaOrmUserRepository<C = DatabaseConnection> {
    conn: C,
}

impl<C> SeaOrmUserRepository<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }
}

fn user_record(m: models::user::Model) -> UserRecord {
    let verified = m.is_verified();
    UserRecord { id: m.id, email: m.email, password_hash: m.password_hash, verified }
}

fn verification_key(m: models::email_verification_key::Model) -> VerificationKey {
    VerificationKey {
        id: m.id,
        user_id: m.user_id,
        email: m.email,
        token: m.token,
        created_at: m.created_at.with_timezone(&Utc),
    }
}

#[async_trait::async_trait]
impl<C: ConnectionTrait + Send + Sync> UserQueries for SeaOrmUserRepository<C> {
    async fn verified_email_exists(&self, email: &str) -> Result<bool, RepositoryError> {
        Ok(models::user::verified_email_exists(&self.conn, email).await?)
    }

    async fn insert_user(&self, id: Uuid, email: &str, password_hash: &str) -> Result<UserRecord, RepositoryError> {
        let created = models::user::insert(&self.conn, id, email, password_hash).await?;
        Ok(user_record(created))
    }

    async fn insert_verification_key(&self, user_id: Uuid, email: &str, token: &str) -> Result<VerificationKey, RepositoryError> {
        let created = models::email_verification_key::insert(&self.conn, user_id, email, token).await?;
        Ok(verification_key(created))
    }

    async fn get_verification_key_by_token(&self, token: &str) -> Result<Option<VerificationKey>, RepositoryError> {
        let found = models::email_verification_key::find_by_token(&self.conn, token).await?;
        Ok(found.map(verification_key))
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        Ok(models::user::mark_email_verified(&self.conn, user_id).await?)
    }

    async fn delete_unverified_users_by_email(&self, email: &str) -> Result<u64, RepositoryError> {
        Ok(models::user::delete_unverified_by_email(&self.conn, email).await?)
    }

    async fn delete_verification_key_by_id(&self, id: i32) -> Result<(), RepositoryError> {
        Ok(models::email_verification_key::delete_by_id(&self.conn, id).await?)
    }

    async fn get_verified_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepositoryError> {
        let found = models::user::find_verified_by_email(&self.conn, email).await?;
        Ok(found.map(user_record))
    }
}

#[async_trait::async_trait]
impl UserStore for SeaOrmUserRepository<DatabaseConnection> {
    type Transaction = SeaOrmUserRepository<DatabaseTransaction>;

    async fn begin(&self) -> Result<Self::Transaction, RepositoryError> {
        let tx = self.conn.begin().await.map_err(|e| RepositoryError::Db(e.to_string()))?;
        Ok(SeaOrmUserRepository::new(tx))
    }
}

#[async_trait::async_trait]
impl UserTransaction for SeaOrmUserRepository<DatabaseTransaction> {
    async fn commit(self) -> Result<(), RepositoryError> {
        self.conn.commit().await.map_err(|e| RepositoryError::Db(e.to_string()))
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        self.conn.rollback().await.map_err(|e| RepositoryError::Db(e.to_string()))
    }
}
