use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::email_verification_key;
use crate::errors::ModelError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Set once the address is confirmed; `NULL` means unverified.
    pub email_verified_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    EmailVerificationKeys,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::EmailVerificationKeys => Entity::has_many(email_verification_key::Entity).into(),
        }
    }
}

impl Related<email_verification_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailVerificationKeys.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Insert a new, unverified user.
pub async fn insert<C: ConnectionTrait>(db: &C, id: Uuid, email: &str, password_hash: &str) -> Result<Model, ModelError> {
    if password_hash.trim().is_empty() {
        return Err(ModelError::Validation("password hash required".into()));
    }
    let am = ActiveModel {
        id: Set(id),
        email: Set(email.to_string()),
        password_hash: Set(password_hash.to_string()),
        email_verified_at: Set(None),
        created_at: Set(Utc::now().into()),
    };
    Ok(am.insert(db).await?)
}

pub async fn find_verified_by_email<C: ConnectionTrait>(db: &C, email: &str) -> Result<Option<Model>, ModelError> {
    let found = Entity::find()
        .filter(Column::Email.eq(email))
        .filter(Column::EmailVerifiedAt.is_not_null())
        .one(db)
        .await?;
    Ok(found)
}

pub async fn verified_email_exists<C: ConnectionTrait>(db: &C, email: &str) -> Result<bool, ModelError> {
    let count = Entity::find()
        .filter(Column::Email.eq(email))
        .filter(Column::EmailVerifiedAt.is_not_null())
        .count(db)
        .await?;
    Ok(count > 0)
}

/// Stamp the user's email as verified. Already-verified users keep their
/// original timestamp.
pub async fn mark_email_verified<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<(), ModelError> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    Entity::update_many()
        .col_expr(Column::EmailVerifiedAt, Expr::value(now))
        .filter(Column::Id.eq(id))
        .filter(Column::EmailVerifiedAt.is_null())
        .exec(db)
        .await?;
    Ok(())
}

/// Remove every unverified user registered under `email`. Returns the number
/// of rows removed.
pub async fn delete_unverified_by_email<C: ConnectionTrait>(db: &C, email: &str) -> Result<u64, ModelError> {
    let res = Entity::delete_many()
        .filter(Column::Email.eq(email))
        .filter(Column::EmailVerifiedAt.is_null())
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}
