use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};

use foodgram_core::service::FoodgramService;
use foodgram_core::shopping_list::ShoppingList;

pub(crate) fn cmd_shopping_list(
    service: &FoodgramService,
    username: &str,
    signature: &str,
    output: Option<&Path>,
) -> Result<()> {
    let list = build_for_user(service, username, signature, Local::now().date_naive())?;

    match output {
        Some(path) => {
            write_report(&list, path)?;
            eprintln!(
                "Wrote {} item(s) to {}",
                list.items.len(),
                path.display()
            );
        }
        None => println!("{}", list.body),
    }

    Ok(())
}

fn build_for_user(
    service: &FoodgramService,
    username: &str,
    signature: &str,
    date: NaiveDate,
) -> Result<ShoppingList> {
    let user = service.get_user_by_username(username)?;
    service.shopping_list(&user, signature, date)
}

/// Write the report body; a directory target gets the list's own filename.
fn write_report(list: &ShoppingList, path: &Path) -> Result<()> {
    let target = if path.is_dir() {
        path.join(&list.filename)
    } else {
        path.to_path_buf()
    };
    std::fs::write(&target, &list.body)
        .with_context(|| format!("Failed to write shopping list: {}", target.display()))
}
