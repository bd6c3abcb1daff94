//! Built-in CSV column rules
//!
//! A few well-known tabular sources ship without catalog configuration; their
//! document, closure-date and geometry columns are known by dataset code.
//! Inferred rules are persisted back to the dataset row with first-write-wins
//! semantics, so a later manual correction in the catalog is never clobbered.

use anyhow::{Context, Result};
use sqlx::PgConnection;

/// CSV column mapping for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvRules {
    /// Column holding the person/company document number.
    pub doc_col: Option<String>,
    /// Column holding the record-closure date.
    pub date_closed_col: Option<String>,
    /// Column holding WKT geometry.
    pub geom_col: Option<String>,
}

impl CsvRules {
    pub fn is_empty(&self) -> bool {
        self.doc_col.is_none() && self.date_closed_col.is_none() && self.geom_col.is_none()
    }
}

/// Known column mappings by dataset code.
pub fn infer_csv_rules(dataset_code: &str) -> CsvRules {
    match dataset_code.to_uppercase().as_str() {
        "CADASTRO DE EMPREGADORES" | "CADASTRO_DE_EMPREGADORES" => CsvRules {
            doc_col: Some("CNPJ/CPF".to_string()),
            ..CsvRules::default()
        },
        "LISTA EMBARGOS IBAMA" | "LISTA_EMBARGOS_IBAMA" => CsvRules {
            doc_col: Some("CPF_CNPJ_EMBARGADO".to_string()),
            date_closed_col: Some("DAT_DESEMBARGO".to_string()),
            geom_col: Some("GEOM_AREA_EMBARGADA".to_string()),
        },
        _ => CsvRules::default(),
    }
}

/// Persist inferred rules onto the dataset row, keeping existing values.
pub async fn persist_rules(
    conn: &mut PgConnection,
    dataset_id: i64,
    rules: &CsvRules,
) -> Result<()> {
    sqlx::query(
        "UPDATE landwatch.lw_dataset \
         SET csv_doc_col = COALESCE(csv_doc_col, $1), \
             csv_date_closed_col = COALESCE(csv_date_closed_col, $2), \
             csv_geom_col = COALESCE(csv_geom_col, $3) \
         WHERE dataset_id = $4",
    )
    .bind(&rules.doc_col)
    .bind(&rules.date_closed_col)
    .bind(&rules.geom_col)
    .bind(dataset_id)
    .execute(conn)
    .await
    .context("Failed to persist inferred CSV rules")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_employers_registry_rules() {
        let rules = infer_csv_rules("CADASTRO_DE_EMPREGADORES");
        assert_eq!(rules.doc_col.as_deref(), Some("CNPJ/CPF"));
        assert!(rules.date_closed_col.is_none());
        assert!(rules.geom_col.is_none());

        // space-separated spelling is accepted too
        assert_eq!(rules, infer_csv_rules("cadastro de empregadores"));
    }

    #[test]
    fn test_embargo_list_rules() {
        let rules = infer_csv_rules("LISTA_EMBARGOS_IBAMA");
        assert_eq!(rules.doc_col.as_deref(), Some("CPF_CNPJ_EMBARGADO"));
        assert_eq!(rules.date_closed_col.as_deref(), Some("DAT_DESEMBARGO"));
        assert_eq!(rules.geom_col.as_deref(), Some("GEOM_AREA_EMBARGADA"));
    }

    #[test]
    fn test_unknown_dataset_gets_no_rules() {
        assert!(infer_csv_rules("SOME_OTHER_DATASET").is_empty());
    }
}
