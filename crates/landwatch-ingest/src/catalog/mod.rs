//! Version catalog access
//!
//! The catalog lives in PostgreSQL under the `landwatch` schema: categories,
//! datasets and dataset versions. Every connection pins its `search_path` so
//! unqualified staging-table names resolve into the `landwatch` schema.

pub mod retry;
pub mod versions;

pub use retry::{is_transient, is_transient_anyhow, retry_delay};
pub use versions::{
    finish_version, get_last_good_fingerprint, get_or_create_category, get_or_create_dataset,
    load_dataset_config, start_version, DatasetConfig,
};

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::DbConfig;

/// Create the catalog connection pool.
///
/// Each new connection sets `search_path TO landwatch, public` before it is
/// handed out, so staging and catalog statements can use unqualified names.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Creating database connection pool"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET search_path TO landwatch, public")
                    .execute(conn)
                    .await?;
                Ok(())
            })
        });

    if let Some(idle) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle));
    }

    let pool = options
        .connect(&config.url)
        .await
        .context("Failed to connect to database")?;

    info!("Database connection pool established");
    Ok(pool)
}
