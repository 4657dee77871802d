//! Durable storage for devices, gateways and sessions

pub mod entities;
pub mod ipalloc;
pub mod migrator;
pub mod store;

pub use ipalloc::next_free_ipv4;
pub use store::{DbStore, NewDevice, Store, StoreError};

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

/// Open a connection pool for `url` (`sqlite::memory:`, `sqlite://wardgate.db?mode=rwc`, `postgres://...`)
pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(url.to_owned());
    options.sqlx_logging(false);
    if url.contains(":memory:") {
        // Every pooled connection would otherwise open its own empty database.
        options.max_connections(1).min_connections(1);
    }

    let db = Database::connect(options).await?;
    tracing::debug!(backend = ?db.get_database_backend(), "connected to database");
    Ok(db)
}

/// Apply all pending migrations
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    migrator::Migrator::up(db, None).await
}
