use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Users: lookups by email (verified or not)
        manager
            .create_index(
                Index::create()
                    .name("idx_users_email")
                    .table(Users::Table)
                    .col(Users::Email)
                    .to_owned(),
            )
            .await?;

        // Users: an address may be verified by at most one account.
        // Partial index, so written as raw SQL.
        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE UNIQUE INDEX IF NOT EXISTS "uniq_users_verified_email"
                   ON "users" ("email") WHERE "email_verified_at" IS NOT NULL"#,
            )
            .await?;

        // EmailVerificationKeys: index on user_id for the cascade
        manager
            .create_index(
                Index::create()
                    .name("idx_email_verification_keys_user")
                    .table(EmailVerificationKeys::Table)
                    .col(EmailVerificationKeys::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_email_verification_keys_user").table(EmailVerificationKeys::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("uniq_users_verified_email").table(Users::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_users_email").table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users { Table, Email }

#[derive(DeriveIden)]
enum EmailVerificationKeys { Table, UserId }
