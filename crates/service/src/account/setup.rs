use std::sync::Arc;

use anyhow::Context;
use configs::AppConfig;
use sea_orm::DatabaseConnection;

use super::hashing::Argon2IdHasher;
use super::mailer::{ConsoleMailer, Mailer, VerificationMailer};
use super::repo::SeaOrmUserRepository;
use super::service::{AccountConfig, AccountService};
use super::token::OsTokenGenerator;

/// Assemble the production service: Argon2id, OS tokens, SeaORM storage and
/// the given notification gateway.
pub fn build_account_service_with_mailer(
    cfg: &AppConfig,
    db: DatabaseConnection,
    mailer: Arc<dyn Mailer>,
) -> anyhow::Result<AccountService<SeaOrmUserRepository>> {
    let hasher = Argon2IdHasher::from_config(&cfg.hashing).context("hashing parameters")?;
    let base_url = cfg.identity.parsed_base_url()?;
    let verification = VerificationMailer::new(mailer, base_url, cfg.identity.sender.clone(), cfg.identity.mail_timeout())
        .context("verification mailer")?;

    Ok(AccountService::new(
        Arc::new(SeaOrmUserRepository::new(db)),
        Arc::new(hasher),
        Arc::new(OsTokenGenerator),
        verification,
        AccountConfig { token_lifetime: cfg.identity.token_lifetime() },
    ))
}

/// Same as [`build_account_service_with_mailer`] with notifications printed
/// to stdout.
pub fn build_account_service(cfg: &AppConfig, db: DatabaseConnection) -> anyhow::Result<AccountService<SeaOrmUserRepository>> {
    build_account_service_with_mailer(cfg, db, Arc::new(ConsoleMailer::stdout()))
}
