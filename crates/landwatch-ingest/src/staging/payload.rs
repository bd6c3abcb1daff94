//! Payload normalization
//!
//! Collapses whatever shape `stg_raw` has into the fixed payload contract the
//! ingest script consumes: `row_id`, the full attribute row as jsonb, the
//! geometry as WKT text (or NULL), and an optional feature-key override from
//! the dataset's natural-id column.

use anyhow::{Context, Result};
use sqlx::PgConnection;
use tracing::warn;

use super::{drop_table, quote_ident, STG_PAYLOAD};

/// Find a `stg_raw` column by name, tolerating case drift.
///
/// Catalog configuration is hand-maintained while loader output casing
/// depends on the source, so exact, lowercase and uppercase spellings are
/// all accepted.
pub async fn resolve_stg_column(
    conn: &mut PgConnection,
    preferred: &str,
) -> Result<Option<String>> {
    let columns: Vec<String> = sqlx::query_scalar(
        "SELECT column_name \
         FROM information_schema.columns \
         WHERE table_schema = 'landwatch' AND table_name = 'stg_raw'",
    )
    .fetch_all(conn)
    .await
    .context("Failed to list raw staging columns")?;

    for candidate in [
        preferred.to_string(),
        preferred.to_lowercase(),
        preferred.to_uppercase(),
    ] {
        if columns.contains(&candidate) {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Build `stg_payload` from a CSV-shaped `stg_raw`.
///
/// The whole row becomes the jsonb payload; when the dataset declares a
/// geometry column its text value passes through as WKT.
pub async fn create_payload_from_csv(
    conn: &mut PgConnection,
    geom_col: Option<&str>,
) -> Result<()> {
    drop_table(conn, STG_PAYLOAD).await?;

    let geom_select = match geom_col {
        Some(col) => format!("t.{} AS geom_wkt", quote_ident(col)),
        None => "NULL::text AS geom_wkt".to_string(),
    };

    sqlx::query(&format!(
        "CREATE UNLOGGED TABLE landwatch.stg_payload AS \
         SELECT \
           row_number() OVER ()::bigint AS row_id, \
           to_jsonb(t) AS payload, \
           {geom_select}, \
           NULL::text AS feature_key_override \
         FROM landwatch.stg_raw t"
    ))
    .execute(conn)
    .await
    .context("Failed to build payload staging from CSV")?;

    Ok(())
}

/// Build `stg_payload` from a geometry-loaded `stg_raw`.
///
/// The loader's `geom` column is dropped from the jsonb payload and exported
/// as WKT. When the dataset names a natural-id column it becomes the feature
/// key override; a configured column missing from the data degrades to the
/// full-row hash key with a warning.
pub async fn create_payload_from_geometry(
    conn: &mut PgConnection,
    natural_id_col: Option<&str>,
) -> Result<()> {
    drop_table(conn, STG_PAYLOAD).await?;

    let feature_expr = match natural_id_col {
        Some(preferred) => match resolve_stg_column(conn, preferred).await? {
            Some(col) => format!("t.{}::text AS feature_key_override", quote_ident(&col)),
            None => {
                warn!(
                    natural_id_col = preferred,
                    "Natural-id column not found in raw staging, falling back to full-row hash"
                );
                "NULL::text AS feature_key_override".to_string()
            },
        },
        None => "NULL::text AS feature_key_override".to_string(),
    };

    sqlx::query(&format!(
        "CREATE UNLOGGED TABLE landwatch.stg_payload AS \
         SELECT \
           row_number() OVER ()::bigint AS row_id, \
           to_jsonb(t) - 'geom' AS payload, \
           ST_AsText(t.geom) AS geom_wkt, \
           {feature_expr} \
         FROM landwatch.stg_raw t"
    ))
    .execute(conn)
    .await
    .context("Failed to build payload staging from geometry")?;

    Ok(())
}
