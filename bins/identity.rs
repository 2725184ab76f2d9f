use std::process::ExitCode;

use anyhow::Context;
use dotenvy::dotenv;
use migration::MigratorTrait;
use service::account::repo::SeaOrmUserRepository;
use service::account::AccountService;
use tracing::{error, info, warn};
use uuid::Uuid;

fn init_logging() {
    // .env first so RUST_LOG from it applies
    dotenv().ok();
    common::utils::logging::init_logging_default();
    info!(service = "identity", event = "logger_init", "tracing subscriber initialized");
}

fn load_config() -> anyhow::Result<configs::AppConfig> {
    match configs::AppConfig::load_and_validate() {
        Ok(cfg) => Ok(cfg),
        Err(e) => {
            warn!(service = "identity", event = "config_fallback", error = %e, "config file unusable, using defaults and environment");
            configs::AppConfig::from_env()
        }
    }
}

async fn run(instance_id: Uuid) -> anyhow::Result<AccountService<SeaOrmUserRepository>> {
    let cfg = load_config()?;

    let db = models::db::connect_with_config(&cfg.database)
        .await
        .context("connecting to database")?;
    migration::Migrator::up(&db, None).await.context("applying migrations")?;
    info!(service = "identity", event = "migrated", %instance_id, "database schema up to date");

    let accounts = service::account::setup::build_account_service(&cfg, db)?;
    info!(
        service = "identity",
        event = "ready",
        %instance_id,
        base_url = %cfg.identity.base_url,
        token_lifetime_secs = cfg.identity.token_lifetime_secs,
        "account service ready"
    );
    Ok(accounts)
}

fn main() -> ExitCode {
    init_logging();

    let instance_id = Uuid::new_v4();
    let pid = std::process::id();
    let version = env!("CARGO_PKG_VERSION");

    std::panic::set_hook(Box::new(move |info| {
        error!(service = "identity", event = "panic", %instance_id, pid, message = %info, "unhandled panic occurred");
    }));

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(service = "identity", event = "runtime_build_failed", error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    info!(service = "identity", event = "start", %instance_id, pid, version, "identity service starting");

    rt.block_on(async move {
        let _accounts = match run(instance_id).await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(service = "identity", event = "start_failed", error = %e, "startup failed");
                return ExitCode::FAILURE;
            }
        };
        // Nothing is exposed over the network yet; a transport adapter (e.g. an
        // HTTP layer) would take `_accounts` here. Hold the pool until interrupted.
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(service = "identity", event = "shutdown_signal", %instance_id, pid, "received Ctrl+C, shutting down");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(service = "identity", event = "signal_error", error = %e, "cannot listen for Ctrl+C");
                ExitCode::FAILURE
            }
        }
    })
}
