

use anyhow::Result;
use configs::DatabaseConfig;
use migration::MigratorTrait;
use sea_orm::DatabaseConnection;

use crate::db::{connect_with_config, DATABASE_URL};

/// Connect and migrate, or `None` when the database tests should be skipped.
pub(crate) async fn setup_test_db() -> Result<Option<DatabaseConnection>> {
    if std::env::var("SKIP_DB_TESTS").is_ok() {
        return Ok(None);
    }
    let cfg = DatabaseConfig {
        url: DATABASE_URL.clone(),
        min_connections: 1,
        max_connections: 5,
        connect_timeout_secs: 5,
        acquire_timeout_secs: 5,
        ..DatabaseConfig::default()
    };
    let db = match connect_with_config(&cfg).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("skip: cannot connect to db: {}", e);
            return Ok(None);
        }
    };
    migration::Migrator::up(&db, None).await?;
    Ok(Some(db))
}

pub(crate) fn unique_email(prefix: &str) -> String {
    format!("{}_{}@example.com", prefix, uuid::Uuid::new_v4())
}
