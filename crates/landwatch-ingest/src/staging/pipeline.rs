//! Per-file staging drivers
//!
//! One function per source shape, each running the full staged protocol for
//! a file whose version row is already open: raw staging, payload
//! normalization, ingest script.

use anyhow::{Context, Result};
use sqlx::PgConnection;
use std::path::Path;
use tracing::{debug, info, warn};

use landwatch_common::fingerprint::shapefile_components;

use super::csv::create_raw_from_csv;
use super::payload::{create_payload_from_csv, create_payload_from_geometry};
use super::rules::{infer_csv_rules, persist_rules, CsvRules};
use super::script::{run_ingest_script, ScriptParams};
use super::{drop_table, STG_RAW};
use crate::bulk::GeometryLoader;
use crate::catalog::load_dataset_config;

/// Stage and ingest one CSV file.
pub async fn process_csv(
    conn: &mut PgConnection,
    dataset_id: i64,
    dataset_code: &str,
    csv_path: &Path,
    snapshot_date: &str,
    version_id: i64,
    ingest_sql_path: &Path,
) -> Result<()> {
    let config = load_dataset_config(conn, dataset_id).await?;
    let delimiter = config
        .csv_delimiter
        .as_deref()
        .and_then(|s| s.chars().next())
        .unwrap_or(';');
    let encoding = config.csv_encoding.clone().unwrap_or_else(|| "latin1".to_string());

    let mut rules = CsvRules {
        doc_col: config.csv_doc_col.clone(),
        date_closed_col: config.csv_date_closed_col.clone(),
        geom_col: config.csv_geom_col.clone(),
    };
    if rules.is_empty() {
        rules = infer_csv_rules(dataset_code);
        if !rules.is_empty() {
            debug!(dataset = dataset_code, "Persisting inferred CSV column rules");
            persist_rules(conn, dataset_id, &rules).await?;
        }
    }

    debug!(
        delimiter = %delimiter,
        encoding,
        doc_col = ?rules.doc_col,
        date_col = ?rules.date_closed_col,
        geom_col = ?rules.geom_col,
        "CSV staging configuration"
    );

    create_raw_from_csv(conn, csv_path, delimiter, &encoding).await?;
    create_payload_from_csv(conn, rules.geom_col.as_deref()).await?;

    run_ingest_script(
        conn,
        ingest_sql_path,
        &ScriptParams {
            dataset_id,
            version_id,
            snapshot_date,
            doc_col: rules.doc_col.as_deref(),
            date_col: rules.date_closed_col.as_deref(),
            is_spatial: rules.geom_col.is_some(),
            srid: config.srid,
        },
    )
    .await
}

/// Stage and ingest one shapefile.
///
/// The bulk loader writes through its own connections, so the raw staging
/// table is dropped on this connection first and each statement here commits
/// individually rather than joining one transaction.
pub async fn process_shapefile(
    conn: &mut PgConnection,
    loader: &GeometryLoader,
    dataset_id: i64,
    shp_path: &Path,
    snapshot_date: &str,
    version_id: i64,
    ingest_sql_path: &Path,
) -> Result<()> {
    let config = load_dataset_config(conn, dataset_id).await?;

    let components = shapefile_components(shp_path);
    let mut total_size: u64 = 0;
    for part in &components {
        total_size += tokio::fs::metadata(part)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
    }
    info!(
        srid = config.srid,
        components = components.len(),
        total_size_bytes = total_size,
        natural_id_col = ?config.natural_id_col,
        "Shapefile staging configuration"
    );
    if config.natural_id_col.is_none() {
        warn!("No natural-id column configured, feature keys fall back to the full-row hash");
    }

    drop_table(conn, STG_RAW).await?;
    // Boxed through `dyn Future`: the load future holds its higher-ranked
    // `dyn for<'a> FnMut(&'a str)` line callback across an await, which makes
    // rustc reject the `Send` proof of every enclosing future with a spurious
    // "implementation of `Send` is not general enough" error
    // (rust-lang/rust#102211). Erasing the future here keeps the binder out
    // of the callers' generators.
    let load_fut: std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<crate::bulk::LoadReport, crate::bulk::BulkError>> + Send + '_>,
    > = Box::pin(loader.load(shp_path, total_size));
    load_fut
        .await
        .with_context(|| format!("Bulk load of {} failed", shp_path.display()))?;

    create_payload_from_geometry(conn, config.natural_id_col.as_deref()).await?;

    run_ingest_script(
        conn,
        ingest_sql_path,
        &ScriptParams {
            dataset_id,
            version_id,
            snapshot_date,
            doc_col: None,
            date_col: None,
            is_spatial: true,
            srid: config.srid,
        },
    )
    .await
}
