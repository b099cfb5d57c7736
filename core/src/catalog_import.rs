use std::collections::HashSet;
use std::io::Read;

use anyhow::{Context, Result};

use crate::db::Database;
use crate::models::{NewIngredient, normalize_ingredient};

/// Summary of what an ingredient import would do / did.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngredientImportSummary {
    pub rows_parsed: usize,
    pub created: usize,
    pub skipped: usize,
}

/// Parse a headerless `name,measurement_unit` CSV from any reader.
///
/// Rows with an empty name or unit are skipped. Extra columns are ignored.
pub fn parse_ingredient_csv<R: Read>(reader: R) -> Result<Vec<NewIngredient>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 1))?;
        let name = record.get(0).unwrap_or("");
        let unit = record.get(1).unwrap_or("");
        if name.is_empty() || unit.is_empty() {
            continue;
        }
        rows.push(NewIngredient {
            name: name.to_string(),
            measurement_unit: unit.to_string(),
        });
    }
    Ok(rows)
}

/// Insert parsed ingredients, skipping pairs that already exist.
///
/// The import is all-or-nothing: an invalid row leaves the catalog
/// untouched. When `dry_run` is true nothing is written; the summary still
/// reports what would have been created.
pub fn import_ingredients(
    db: &Database,
    rows: &[NewIngredient],
    dry_run: bool,
) -> Result<IngredientImportSummary> {
    let mut summary = IngredientImportSummary {
        rows_parsed: rows.len(),
        ..IngredientImportSummary::default()
    };
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let tx = db.transaction()?;

    for (i, row) in rows.iter().enumerate() {
        let ingredient =
            normalize_ingredient(row).with_context(|| format!("Invalid ingredient in row {}", i + 1))?;
        let key = (ingredient.name.clone(), ingredient.measurement_unit.clone());
        let exists = !seen.insert(key)
            || db
                .find_ingredient(&ingredient.name, &ingredient.measurement_unit)?
                .is_some();
        if exists {
            summary.skipped += 1;
            continue;
        }
        if !dry_run {
            db.insert_ingredient(&ingredient)?;
        }
        summary.created += 1;
    }

    if !dry_run {
        tx.commit().context("Failed to commit ingredient import")?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
flour,g
Milk , ml
eggs,pcs
,
salt,g,extra column
flour,g
";

    #[test]
    fn test_parse_ingredient_csv() {
        let rows = parse_ingredient_csv(SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[1].name, "Milk");
        assert_eq!(rows[1].measurement_unit, "ml");
        assert_eq!(rows[3].name, "salt");
    }

    #[test]
    fn test_parse_skips_rows_without_unit() {
        let rows = parse_ingredient_csv("butter\nsugar,g\n".as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "sugar");
    }

    #[test]
    fn test_import_dry_run() {
        let db = Database::open_in_memory().unwrap();
        let rows = parse_ingredient_csv(SAMPLE_CSV.as_bytes()).unwrap();
        let summary = import_ingredients(&db, &rows, true).unwrap();
        assert_eq!(
            summary,
            IngredientImportSummary {
                rows_parsed: 5,
                created: 4,
                skipped: 1,
            }
        );
        assert!(db.list_ingredients(None).unwrap().is_empty());
    }

    #[test]
    fn test_import_skips_existing_pairs() {
        let db = Database::open_in_memory().unwrap();
        db.insert_ingredient(&NewIngredient {
            name: "Salt".to_string(),
            measurement_unit: "g".to_string(),
        })
        .unwrap();

        let rows = parse_ingredient_csv(SAMPLE_CSV.as_bytes()).unwrap();
        let summary = import_ingredients(&db, &rows, false).unwrap();
        assert_eq!(summary.created, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(db.list_ingredients(None).unwrap().len(), 4);

        // Running it again creates nothing.
        let again = import_ingredients(&db, &rows, false).unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 5);
    }

    #[test]
    fn test_import_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingredients.csv");
        std::fs::write(&path, "rice,g\nwater,ml\n").unwrap();

        let db = Database::open_in_memory().unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let rows = parse_ingredient_csv(file).unwrap();
        let summary = import_ingredients(&db, &rows, false).unwrap();
        assert_eq!(summary.created, 2);
    }

    #[test]
    fn test_import_reports_bad_row() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![NewIngredient {
            name: "x".repeat(100),
            measurement_unit: "g".to_string(),
        }];
        let err = import_ingredients(&db, &rows, false).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_bad_row_rolls_back_earlier_rows() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![
            NewIngredient {
                name: "rice".to_string(),
                measurement_unit: "g".to_string(),
            },
            NewIngredient {
                name: "water".to_string(),
                measurement_unit: "ml".to_string(),
            },
            NewIngredient {
                name: "x".repeat(100),
                measurement_unit: "g".to_string(),
            },
        ];
        let err = import_ingredients(&db, &rows, false).unwrap_err();
        assert!(err.to_string().contains("row 3"));
        assert!(db.list_ingredients(None).unwrap().is_empty());

        // The connection is usable again once the import has rolled back.
        let summary = import_ingredients(&db, &rows[..2], false).unwrap();
        assert_eq!(summary.created, 2);
        assert_eq!(db.list_ingredients(None).unwrap().len(), 2);
    }
}
