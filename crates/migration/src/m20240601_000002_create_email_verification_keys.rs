//! Create `email_verification_keys` table with FK to `users`.
//!
//! Keys cascade away with their user, so pruning duplicate unverified
//! registrations also drops their outstanding tokens.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailVerificationKeys::Table)
                    .if_not_exists()
                    .col(pk_auto(EmailVerificationKeys::Id))
                    .col(uuid(EmailVerificationKeys::UserId).not_null())
                    .col(string_len(EmailVerificationKeys::Email, 254).not_null())
                    .col(string_len(EmailVerificationKeys::Token, 255).unique_key().not_null())
                    .col(timestamp_with_time_zone(EmailVerificationKeys::CreatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_email_verification_keys_user")
                            .from(EmailVerificationKeys::Table, EmailVerificationKeys::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailVerificationKeys::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EmailVerificationKeys { Table, Id, UserId, Email, Token, CreatedAt }

#[derive(DeriveIden)]
enum Users { Table, Id }
