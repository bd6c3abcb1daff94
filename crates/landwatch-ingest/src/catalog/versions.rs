//! Category, dataset and version bookkeeping
//!
//! Every function takes `&mut PgConnection` so callers decide the transaction
//! boundary. The per-file pipeline runs an entire file (catalog rows, staging,
//! ingest script) inside one transaction and passes `&mut *tx` down here.

use anyhow::{Context, Result};
use sqlx::PgConnection;
use tracing::debug;

use landwatch_common::types::VersionStatus;

/// Fallback SRID for spatial datasets without an explicit one.
pub const DEFAULT_SRID: i32 = 4674;

/// Per-dataset ingest configuration resolved from the catalog.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DatasetConfig {
    pub dataset_id: i64,
    pub code: String,
    pub is_spatial: bool,
    /// Dataset SRID, falling back to the category default, then 4674.
    pub srid: i32,
    /// Stable business key column, dataset override before category default.
    pub natural_id_col: Option<String>,
    pub csv_delimiter: Option<String>,
    pub csv_encoding: Option<String>,
    pub csv_doc_col: Option<String>,
    pub csv_date_closed_col: Option<String>,
    pub csv_geom_col: Option<String>,
}

/// Look up a category by code, inserting it with the default SRID when new.
pub async fn get_or_create_category(conn: &mut PgConnection, code: &str) -> Result<i64> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT category_id FROM landwatch.lw_category WHERE code = $1")
            .bind(code)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up category")?;

    if let Some(id) = existing {
        return Ok(id);
    }

    debug!(category = code, "Creating catalog category");
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO landwatch.lw_category (code, description, default_srid) \
         VALUES ($1, $1, $2) RETURNING category_id",
    )
    .bind(code)
    .bind(DEFAULT_SRID)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to create category")?;

    Ok(id)
}

/// Look up a dataset by code, inserting it under its category when new.
pub async fn get_or_create_dataset(
    conn: &mut PgConnection,
    dataset_code: &str,
    category_code: &str,
    is_spatial: bool,
) -> Result<i64> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT dataset_id FROM landwatch.lw_dataset WHERE code = $1")
            .bind(dataset_code)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up dataset")?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let category_id = get_or_create_category(conn, category_code).await?;

    debug!(dataset = dataset_code, category = category_code, "Creating catalog dataset");
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO landwatch.lw_dataset \
           (category_id, code, description, is_spatial, default_srid) \
         VALUES ($1, $2, $2, $3, $4) RETURNING dataset_id",
    )
    .bind(category_id)
    .bind(dataset_code)
    .bind(is_spatial)
    .bind(DEFAULT_SRID)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to create dataset")?;

    Ok(id)
}

/// Resolve the effective ingest configuration for a dataset.
pub async fn load_dataset_config(
    conn: &mut PgConnection,
    dataset_id: i64,
) -> Result<DatasetConfig> {
    let config: Option<DatasetConfig> = sqlx::query_as(
        "SELECT \
           d.dataset_id, \
           d.code, \
           d.is_spatial, \
           COALESCE(d.default_srid, c.default_srid, $2) AS srid, \
           COALESCE(d.natural_id_col, c.natural_id_col) AS natural_id_col, \
           d.csv_delimiter, \
           d.csv_encoding, \
           d.csv_doc_col, \
           d.csv_date_closed_col, \
           d.csv_geom_col \
         FROM landwatch.lw_dataset d \
         JOIN landwatch.lw_category c ON c.category_id = d.category_id \
         WHERE d.dataset_id = $1",
    )
    .bind(dataset_id)
    .bind(DEFAULT_SRID)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to load dataset configuration")?;

    config.ok_or_else(|| {
        landwatch_common::LandwatchError::DatasetNotFound(dataset_id.to_string()).into()
    })
}

/// Fingerprint of the newest successful version, if any.
///
/// Only COMPLETED and SKIPPED_NO_CHANGES versions count; a version that
/// failed after recording its fingerprint must not suppress a reload.
pub async fn get_last_good_fingerprint(
    conn: &mut PgConnection,
    dataset_id: i64,
) -> Result<Option<String>> {
    let fingerprint: Option<String> = sqlx::query_scalar(
        "SELECT source_fingerprint \
         FROM landwatch.lw_dataset_version \
         WHERE dataset_id = $1 \
           AND status IN ('COMPLETED', 'SKIPPED_NO_CHANGES') \
           AND source_fingerprint IS NOT NULL \
         ORDER BY loaded_at DESC, version_id DESC \
         LIMIT 1",
    )
    .bind(dataset_id)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to query last good fingerprint")?;

    Ok(fingerprint.filter(|f| !f.is_empty()))
}

/// Open (or reopen) a version row for this dataset and snapshot date.
///
/// The version label is `{code}_{snapshot_date}`, unique per dataset. A rerun
/// for the same label resets the existing row to RUNNING, clears the error
/// and refreshes source path, fingerprint and `loaded_at`, so reruns converge
/// on one row instead of accumulating duplicates.
pub async fn start_version(
    conn: &mut PgConnection,
    dataset_id: i64,
    dataset_code: &str,
    snapshot_date: &str,
    source_path: &str,
    source_fingerprint: Option<&str>,
) -> Result<i64> {
    let version_label = format!("{dataset_code}_{snapshot_date}");

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT version_id FROM landwatch.lw_dataset_version \
         WHERE dataset_id = $1 AND version_label = $2",
    )
    .bind(dataset_id)
    .bind(&version_label)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to look up dataset version")?;

    if let Some(version_id) = existing {
        debug!(version_label, version_id, "Resetting existing version to RUNNING");
        sqlx::query(
            "UPDATE landwatch.lw_dataset_version \
             SET status = 'RUNNING', \
                 error_message = NULL, \
                 source_path = $1, \
                 snapshot_date = $2::date, \
                 loaded_at = now(), \
                 source_fingerprint = $3 \
             WHERE version_id = $4",
        )
        .bind(source_path)
        .bind(snapshot_date)
        .bind(source_fingerprint)
        .bind(version_id)
        .execute(&mut *conn)
        .await
        .context("Failed to reset dataset version")?;
        return Ok(version_id);
    }

    debug!(version_label, "Creating dataset version");
    let version_id: i64 = sqlx::query_scalar(
        "INSERT INTO landwatch.lw_dataset_version \
           (dataset_id, version_label, snapshot_date, status, source_path, source_fingerprint) \
         VALUES ($1, $2, $3::date, 'RUNNING', $4, $5) \
         RETURNING version_id",
    )
    .bind(dataset_id)
    .bind(&version_label)
    .bind(snapshot_date)
    .bind(source_path)
    .bind(source_fingerprint)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to create dataset version")?;

    Ok(version_id)
}

/// Record the terminal status of a version.
pub async fn finish_version(
    conn: &mut PgConnection,
    version_id: i64,
    status: VersionStatus,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE landwatch.lw_dataset_version \
         SET status = $1, error_message = $2 \
         WHERE version_id = $3",
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(version_id)
    .execute(conn)
    .await
    .context("Failed to finish dataset version")?;

    Ok(())
}
