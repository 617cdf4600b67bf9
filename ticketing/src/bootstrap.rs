//! Store wiring for binaries.

use crate::config::PostgresConfig;
use boxoffice_core::StoreError;
use boxoffice_postgres::PostgresTicketStore;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Open a connection pool sized by `config` and, if configured, apply the
/// bundled migrations.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the database cannot be reached or a
/// migration fails.
pub async fn connect_store(config: &PostgresConfig) -> Result<PostgresTicketStore, StoreError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to ticket store database..."
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect(&config.url)
        .await
        .map_err(|e| StoreError::Unavailable(format!("failed to connect: {e}")))?;

    let store = PostgresTicketStore::from_pool(pool);

    if config.run_migrations {
        info!("Running ticket store migrations...");
        store.migrate().await?;
        info!("Ticket store migrations complete");
    }

    info!("Ticket store connected");
    Ok(store)
}
