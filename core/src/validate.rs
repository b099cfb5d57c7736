//! Recipe payload validation.
//!
//! Everything here is read-only: storage is reached through [`RecipeCatalog`]
//! and nothing is written until the caller persists the validated result.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde_json::Value;

use crate::error::ValidationError;
use crate::models::{
    IngredientEntry, Ingredient, POSITIVE_INT_MAX, RECIPE_NAME_MAX_LEN, RecipePayload,
};

/// Most distinct tag or ingredient ids a single recipe may reference.
pub const MAX_DISTINCT_IDS: usize = 1000;

/// Lookups the validator needs from storage.
pub trait RecipeCatalog {
    /// Ids from `ids` that belong to stored tags.
    fn existing_tag_ids(&self, ids: &[i64]) -> Result<Vec<i64>>;
    /// Stored ingredients whose id is in `ids`.
    fn lookup_ingredients(&self, ids: &[i64]) -> Result<Vec<Ingredient>>;
}

/// Ingredient id → (ingredient, summed amount), ready to become line items.
///
/// Entries keep the order in which their ids were first given.
#[derive(Debug, Clone, Default)]
pub struct ValidatedIngredients {
    entries: Vec<(Ingredient, i64)>,
}

impl ValidatedIngredients {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: i64) -> Option<&(Ingredient, i64)> {
        self.entries.iter().find(|(ingredient, _)| ingredient.id == id)
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, id: i64) -> Option<&mut (Ingredient, i64)> {
        self.entries
            .iter_mut()
            .find(|(ingredient, _)| ingredient.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (Ingredient, i64)> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a ValidatedIngredients {
    type Item = &'a (Ingredient, i64);
    type IntoIter = std::slice::Iter<'a, (Ingredient, i64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// Every scalar field must be present.
    Create,
    /// Absent scalar fields keep their stored value.
    Update,
}

#[derive(Debug, Clone)]
pub struct ValidatedRecipe {
    pub name: Option<String>,
    pub text: Option<String>,
    pub cooking_time: Option<i64>,
    pub image: Option<String>,
    pub tags: Vec<i64>,
    pub ingredients: ValidatedIngredients,
}

/// Integer ids may arrive as JSON numbers or as integer-like strings.
fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The textual form of an amount, the way it is checked for digits.
fn amount_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_amount(value: &Value) -> Result<i64, ValidationError> {
    let text = amount_text(value);
    let invalid = || ValidationError::InvalidAmount {
        amount: text.clone(),
    };
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match text.parse::<i64>() {
        Ok(amount) if amount <= POSITIVE_INT_MAX => Ok(amount),
        _ => Err(invalid()),
    }
}

fn parse_cooking_time(value: &Value) -> Result<i64, ValidationError> {
    let minutes = parse_id(value)
        .ok_or_else(|| ValidationError::invalid_field("cooking_time", "must be an integer"))?;
    if minutes < 1 {
        return Err(ValidationError::invalid_field("cooking_time", "must be at least 1"));
    }
    if minutes > POSITIVE_INT_MAX {
        return Err(ValidationError::invalid_field(
            "cooking_time",
            format!("must be at most {POSITIVE_INT_MAX}"),
        ));
    }
    Ok(minutes)
}

fn too_many(field: &'static str) -> ValidationError {
    ValidationError::invalid_field(field, format!("at most {MAX_DISTINCT_IDS} distinct ids allowed"))
}

/// Confirm every supplied tag id exists. Returns the distinct ids in the
/// order they were first given.
pub fn validate_tags(tags: &[Value], catalog: &impl RecipeCatalog) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(tags.len());
    let mut seen = HashSet::new();
    for raw in tags {
        let id = parse_id(raw).ok_or(ValidationError::UnknownTag)?;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    if ids.len() > MAX_DISTINCT_IDS {
        return Err(too_many("tags").into());
    }

    let existing: HashSet<i64> = catalog.existing_tag_ids(&ids)?.into_iter().collect();
    if existing.len() != ids.len() {
        return Err(ValidationError::UnknownTag.into());
    }
    Ok(ids)
}

/// Check amounts, merge duplicate lines and resolve ingredient ids.
pub fn validate_ingredients(
    entries: &[IngredientEntry],
    catalog: &impl RecipeCatalog,
) -> Result<ValidatedIngredients> {
    let mut order: Vec<i64> = Vec::new();
    let mut totals: HashMap<i64, i64> = HashMap::new();
    let mut unparsable_id = false;

    for entry in entries {
        let amount = parse_amount(&entry.amount)?;
        let Some(id) = parse_id(&entry.id) else {
            unparsable_id = true;
            continue;
        };
        let running = totals.entry(id).or_insert_with(|| {
            order.push(id);
            0
        });
        *running += amount;
        if *running <= 0 || *running > POSITIVE_INT_MAX {
            return Err(ValidationError::InvalidAmount {
                amount: amount_text(&entry.amount),
            }
            .into());
        }
    }

    if entries.is_empty() {
        return Err(ValidationError::NoIngredients.into());
    }
    if order.len() > MAX_DISTINCT_IDS {
        return Err(too_many("ingredients").into());
    }

    let mut found: HashMap<i64, Ingredient> = catalog
        .lookup_ingredients(&order)?
        .into_iter()
        .map(|ingredient| (ingredient.id, ingredient))
        .collect();
    if unparsable_id || found.is_empty() || found.len() != order.len() {
        return Err(ValidationError::UnknownIngredient.into());
    }

    let mut validated = ValidatedIngredients::default();
    for id in order {
        let (Some(ingredient), Some(&amount)) = (found.remove(&id), totals.get(&id)) else {
            return Err(ValidationError::UnknownIngredient.into());
        };
        validated.entries.push((ingredient, amount));
    }
    Ok(validated)
}

fn required<T>(value: Option<T>, field: &'static str, mode: PayloadMode) -> Result<Option<T>> {
    if value.is_none() && mode == PayloadMode::Create {
        return Err(ValidationError::invalid_field(field, "is required").into());
    }
    Ok(value)
}

/// Validate a full recipe create/update body.
pub fn validate_recipe_payload(
    payload: &RecipePayload,
    catalog: &impl RecipeCatalog,
    mode: PayloadMode,
) -> Result<ValidatedRecipe> {
    let (Some(tags), Some(ingredients)) = (&payload.tags, &payload.ingredients) else {
        return Err(ValidationError::MissingFields.into());
    };
    if tags.is_empty() {
        return Err(ValidationError::MissingFields.into());
    }

    let name = required(payload.name.as_deref().map(str::trim), "name", mode)?;
    if let Some(name) = name {
        if name.is_empty() {
            return Err(ValidationError::invalid_field("name", "must not be empty").into());
        }
        if name.chars().count() > RECIPE_NAME_MAX_LEN {
            return Err(ValidationError::invalid_field(
                "name",
                format!("must be at most {RECIPE_NAME_MAX_LEN} characters"),
            )
            .into());
        }
    }

    let text = required(payload.text.as_deref().map(str::trim), "text", mode)?;
    if text.is_some_and(str::is_empty) {
        return Err(ValidationError::invalid_field("text", "must not be empty").into());
    }

    let cooking_time = required(payload.cooking_time.as_ref(), "cooking_time", mode)?
        .map(parse_cooking_time)
        .transpose()?;

    let tags = validate_tags(tags, catalog)?;
    let ingredients = validate_ingredients(ingredients, catalog)?;

    Ok(ValidatedRecipe {
        name: name.map(str::to_string),
        text: text.map(str::to_string),
        cooking_time,
        image: payload.image.clone(),
        tags,
        ingredients,
    })
}
