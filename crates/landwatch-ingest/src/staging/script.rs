//! Parameterized ingest script execution
//!
//! The merge from `stg_payload` into the typed target tables lives in a SQL
//! template (`sql/ingest.sql`) so the set logic stays reviewable as SQL. The
//! template carries three structural placeholders (`{{STG_TABLE}}`,
//! `{{DOC_DATE_SQL}}`, `{{GEOM_SQL}}`) and three value parameters
//! (`:dataset_id`, `:version_id`, `:snapshot_date`). The rendered script is
//! a multi-statement batch, so values are substituted as validated SQL
//! literals and the whole thing runs through `raw_sql`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgConnection;
use std::path::Path;
use tracing::{debug, info};

use super::{sql_literal, STG_PAYLOAD};

/// Value and shape parameters of one script run.
#[derive(Debug, Clone)]
pub struct ScriptParams<'a> {
    pub dataset_id: i64,
    pub version_id: i64,
    /// Must be `YYYY-MM-DD`; validated before substitution.
    pub snapshot_date: &'a str,
    pub doc_col: Option<&'a str>,
    pub date_col: Option<&'a str>,
    pub is_spatial: bool,
    pub srid: i32,
}

/// Normalization statements for document and closure-date columns.
///
/// The document value keeps digits only; the date is accepted when it starts
/// with an ISO `YYYY-MM-DD` prefix and nulled otherwise.
pub fn build_doc_date_sql(doc_col: Option<&str>, date_col: Option<&str>) -> String {
    let mut stmts: Vec<String> = Vec::new();
    if let Some(col) = doc_col {
        stmts.push(format!(
            "UPDATE __stg_norm SET doc_normalized = \
             regexp_replace(attr_json->>{}, '\\D', '', 'g')",
            sql_literal(col)
        ));
    }
    if let Some(col) = date_col {
        let lit = sql_literal(col);
        stmts.push(format!(
            "UPDATE __stg_norm SET date_closed = CASE \
               WHEN (attr_json->>{lit}) ~ '^\\d{{4}}-\\d{{2}}-\\d{{2}}' \
               THEN (attr_json->>{lit})::timestamp::date \
               ELSE NULL \
             END"
        ));
    }
    if stmts.is_empty() {
        return "-- no doc/date".to_string();
    }
    let mut sql = stmts.join(";\n");
    sql.push(';');
    sql
}

/// Geometry normalization statements.
///
/// WKT parses through an exception-swallowing temp function so one bad
/// geometry nulls its row instead of failing the batch; invalid geometries
/// get repaired with `ST_MakeValid`, and the geometry hash is the md5 of the
/// WKB. Non-spatial datasets null both columns.
pub fn build_geom_sql(srid: i32, is_spatial: bool) -> String {
    if !is_spatial {
        return "UPDATE __stg_norm SET geom = NULL, geom_hash = NULL;".to_string();
    }
    format!(
        "CREATE OR REPLACE FUNCTION pg_temp.safe_geom_from_wkt(wkt text, srid int) \
         RETURNS geometry \
         LANGUAGE plpgsql \
         AS $$ \
         BEGIN \
             IF wkt IS NULL OR wkt = '' THEN \
                 RETURN NULL; \
             END IF; \
             RETURN ST_SetSRID(ST_GeomFromText(wkt), srid); \
         EXCEPTION WHEN others THEN \
             RETURN NULL; \
         END; \
         $$;\n\
         UPDATE __stg_norm \
         SET geom = pg_temp.safe_geom_from_wkt(geom_wkt, {srid}) \
         WHERE geom_wkt IS NOT NULL AND geom_wkt <> '';\n\
         UPDATE __stg_norm \
         SET geom = ST_MakeValid(geom) \
         WHERE geom IS NOT NULL AND NOT ST_IsValid(geom);\n\
         UPDATE __stg_norm \
         SET geom_hash = md5(encode(ST_AsBinary(geom), 'hex')) \
         WHERE geom IS NOT NULL;"
    )
}

/// Drop `--` comment lines; the batch executor does not tolerate them
/// reliably across statement boundaries.
pub fn strip_comment_lines(sql: &str) -> String {
    sql.lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the template into an executable batch.
pub fn render(template: &str, params: &ScriptParams<'_>) -> Result<String> {
    NaiveDate::parse_from_str(params.snapshot_date, "%Y-%m-%d").with_context(|| {
        format!("Snapshot date '{}' is not YYYY-MM-DD", params.snapshot_date)
    })?;

    let rendered = template
        .replace("{{STG_TABLE}}", STG_PAYLOAD)
        .replace(
            "{{DOC_DATE_SQL}}",
            &build_doc_date_sql(params.doc_col, params.date_col),
        )
        .replace("{{GEOM_SQL}}", &build_geom_sql(params.srid, params.is_spatial))
        .replace(":dataset_id", &params.dataset_id.to_string())
        .replace(":version_id", &params.version_id.to_string())
        .replace(":snapshot_date", &sql_literal(params.snapshot_date));

    Ok(strip_comment_lines(&rendered))
}

/// Load, render and execute the ingest script as one batch.
pub async fn run_ingest_script(
    conn: &mut PgConnection,
    template_path: &Path,
    params: &ScriptParams<'_>,
) -> Result<()> {
    let template = tokio::fs::read_to_string(template_path)
        .await
        .with_context(|| format!("Failed to read ingest script {}", template_path.display()))?;

    let sql = render(&template, params)?;
    debug!(
        dataset_id = params.dataset_id,
        version_id = params.version_id,
        "Executing ingest script"
    );

    let start = std::time::Instant::now();
    sqlx::raw_sql(&sql)
        .execute(conn)
        .await
        .context("Ingest script failed")?;
    info!(
        elapsed_secs = start.elapsed().as_secs(),
        "Ingest script finished"
    );

    Ok(())
}
