use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ValidationError;

pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const DEFAULT_SIGNATURE: &str = "Foodgram";

/// One line item of a recipe that sits in a user's cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLineItem {
    pub recipe_id: i64,
    pub ingredient_name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

/// A rendered shopping list, ready to be sent as a file download.
#[derive(Debug, Clone, Serialize)]
pub struct ShoppingList {
    pub filename: String,
    pub items: Vec<ShoppingListItem>,
    pub body: String,
}

impl ShoppingList {
    pub fn build(
        username: &str,
        line_items: &[CartLineItem],
        signature: &str,
        date: NaiveDate,
    ) -> Result<Self> {
        let items = aggregate(line_items)?;
        let body = render(&items, signature, date);
        Ok(Self {
            filename: filename(username),
            items,
            body,
        })
    }

    #[must_use]
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename={}", self.filename)
    }
}

/// Sum amounts per ingredient name.
///
/// Names keep the order they first appear in. Rows that share a name but
/// not a unit are merged, and the unit of the last row seen is kept.
/// A total that does not fit in an `i64` is rejected.
pub fn aggregate(line_items: &[CartLineItem]) -> Result<Vec<ShoppingListItem>> {
    let mut items: Vec<ShoppingListItem> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for line in line_items {
        if let Some(&pos) = index.get(line.ingredient_name.as_str()) {
            let item = &mut items[pos];
            item.amount = item.amount.checked_add(line.amount).ok_or_else(|| {
                ValidationError::invalid_field(
                    "amount",
                    format!("total for {} is too large", line.ingredient_name),
                )
            })?;
            item.measurement_unit.clone_from(&line.measurement_unit);
        } else {
            index.insert(line.ingredient_name.as_str(), items.len());
            items.push(ShoppingListItem {
                name: line.ingredient_name.clone(),
                measurement_unit: line.measurement_unit.clone(),
                amount: line.amount,
            });
        }
    }

    Ok(items)
}

/// Numbered `"N. name: amount unit"` lines followed by the signature footer.
#[must_use]
pub fn render(items: &[ShoppingListItem], signature: &str, date: NaiveDate) -> String {
    let mut body = String::new();
    for (i, item) in items.iter().enumerate() {
        body.push_str(&format!(
            "{}. {}: {} {}\n",
            i + 1,
            item.name,
            item.amount,
            item.measurement_unit
        ));
    }
    body.push_str(&format!("\n{signature}, {}", date.format("%b-%d-%Y")));
    body
}

#[must_use]
pub fn filename(username: &str) -> String {
    format!("{username}_shopping_list.txt")
}
