use std::path::Path;
use std::process;

use anyhow::{Context, Result};

use foodgram_core::models::NewIngredient;
use foodgram_core::service::FoodgramService;

use super::helpers::{json_error, print_ingredient_table};

pub(crate) fn cmd_ingredient_add(
    service: &FoodgramService,
    name: &str,
    unit: &str,
    json: bool,
) -> Result<()> {
    let ingredient = service.add_ingredient(&NewIngredient {
        name: name.to_string(),
        measurement_unit: unit.to_string(),
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredient)?);
    } else {
        println!(
            "Added ingredient: {} [{}] (id: {})",
            ingredient.name, ingredient.measurement_unit, ingredient.id
        );
    }

    Ok(())
}

pub(crate) fn cmd_ingredient_list(
    service: &FoodgramService,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    let ingredients = service.list_ingredients(search)?;

    if ingredients.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No ingredients found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredients)?);
    } else {
        print_ingredient_table(&ingredients);
    }

    Ok(())
}

pub(crate) fn cmd_ingredient_import(
    service: &FoodgramService,
    path: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let summary = service.import_ingredients(file, dry_run)?;

    if summary.rows_parsed == 0 {
        if json {
            println!("{}", json_error("No rows found in CSV file"));
        } else {
            eprintln!("No rows found in CSV file.");
        }
        return Ok(());
    }

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dry_run": dry_run,
                "rows_parsed": summary.rows_parsed,
                "created": summary.created,
                "skipped": summary.skipped,
            })
        );
    } else {
        if dry_run {
            println!("Dry run, no changes made.\n");
        } else {
            println!("Import complete.\n");
        }
        println!("  Rows parsed: {}", summary.rows_parsed);
        println!("  Created:     {}", summary.created);
        println!("  Skipped:     {}", summary.skipped);
    }

    Ok(())
}
