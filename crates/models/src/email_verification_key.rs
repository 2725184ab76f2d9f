use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ModelError;
use crate::user;

/// Single-use token proving control of an email address. Expiry is derived
/// from `created_at` by the caller, never stored.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_verification_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: Uuid,
    pub email: String,
    #[sea_orm(unique)]
    pub token: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation { User }

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::User => Entity::belongs_to(user::Entity)
                .from(Column::UserId)
                .to(user::Column::Id)
                .into(),
        }
    }
}

impl Related<user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub async fn insert<C: ConnectionTrait>(db: &C, user_id: Uuid, email: &str, token: &str) -> Result<Model, ModelError> {
    if token.is_empty() {
        return Err(ModelError::Validation("token required".into()));
    }
    let am = ActiveModel {
        user_id: Set(user_id),
        email: Set(email.to_string()),
        token: Set(token.to_string()),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    };
    Ok(am.insert(db).await?)
}

pub async fn find_by_token<C: ConnectionTrait>(db: &C, token: &str) -> Result<Option<Model>, ModelError> {
    let found = Entity::find().filter(Column::Token.eq(token)).one(db).await?;
    Ok(found)
}

pub async fn delete_by_id<C: ConnectionTrait>(db: &C, id: i32) -> Result<(), ModelError> {
    Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}
