//! Migrator registering identity tables in dependency order.
//! Indexes are applied last.
pub use sea_orm_migration::prelude::*;

mod m20240601_000001_create_users;
mod m20240601_000002_create_email_verification_keys;
mod m20240601_000003_add_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_users::Migration),
            Box::new(m20240601_000002_create_email_verification_keys::Migration),
            // Indexes should always be applied last
            Box::new(m20240601_000003_add_indexes::Migration),
        ]
    }
}
