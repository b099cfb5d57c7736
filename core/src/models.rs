use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const RECIPE_NAME_MAX_LEN: usize = 64;
pub const TAG_FIELD_MAX_LEN: usize = 64;
pub const USER_FIELD_MAX_LEN: usize = 150;
pub const EMAIL_MAX_LEN: usize = 254;
pub const DEFAULT_RECIPES_LIMIT: usize = 3;
/// Upper bound for ingredient amounts and cooking times.
pub const POSITIVE_INT_MAX: i64 = 2_147_483_647;

// --- Users ---

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// A freshly registered user together with the only copy of their API token.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredUser {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
}

/// Public view of a user as seen by a (possibly anonymous) viewer.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub email: String,
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

impl UserProfile {
    #[must_use]
    pub fn new(user: User, is_subscribed: bool) -> Self {
        Self {
            email: user.email,
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            is_subscribed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    #[serde(flatten)]
    pub author: UserProfile,
    pub recipes: Vec<RecipeSummary>,
    pub recipes_count: i64,
}

// --- Catalog ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub slug: String,
}

#[derive(Debug, Clone)]
pub struct NewTag {
    pub name: String,
    pub color: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    pub measurement_unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIngredient {
    pub name: String,
    pub measurement_unit: String,
}

// --- Recipes ---

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub author_id: Option<i64>,
    pub text: String,
    pub cooking_time: i64,
    pub image: Option<String>,
    pub pub_date: String,
}

/// One ingredient of a recipe with the amount the recipe calls for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeIngredient {
    pub id: i64,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub tags: Vec<Tag>,
    pub author: Option<UserProfile>,
    pub ingredients: Vec<RecipeIngredient>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: Option<String>,
    pub text: String,
    pub cooking_time: i64,
    pub pub_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeSummary {
    pub id: i64,
    pub name: String,
    pub image: Option<String>,
    pub cooking_time: i64,
}

impl From<Recipe> for RecipeSummary {
    fn from(recipe: Recipe) -> Self {
        Self {
            id: recipe.id,
            name: recipe.name,
            image: recipe.image,
            cooking_time: recipe.cooking_time,
        }
    }
}

/// Recipe create/update body as it arrives over the wire.
///
/// Ids and amounts are kept as raw JSON values: clients send both integers
/// and integer-like strings, and the validator decides what is acceptable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipePayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub cooking_time: Option<serde_json::Value>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub ingredients: Option<Vec<IngredientEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngredientEntry {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub amount: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct RecipeFilter {
    pub is_favorited: Option<bool>,
    pub is_in_shopping_cart: Option<bool>,
    pub author: Option<i64>,
    pub tags: Vec<String>,
}

// --- User relations ---

#[derive(Debug, Clone, Serialize)]
pub struct CartEntry {
    pub id: i64,
    pub user_id: i64,
    pub recipe_id: i64,
    pub added_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FavoriteEntry {
    pub id: i64,
    pub user_id: i64,
    pub recipe_id: i64,
    pub added_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Follow {
    pub id: i64,
    pub user_id: i64,
    pub following_id: i64,
}

// --- Normalization and field validation ---

/// Trim and lowercase a catalog name, unit or slug.
#[must_use]
pub fn normalize_name(value: &str) -> String {
    value.trim().to_lowercase()
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<()> {
    if value.is_empty() {
        return Err(ValidationError::invalid_field(field, "must not be empty").into());
    }
    if value.chars().count() > max {
        return Err(
            ValidationError::invalid_field(field, format!("must be at most {max} characters"))
                .into(),
        );
    }
    Ok(())
}

pub fn normalize_ingredient(ingredient: &NewIngredient) -> Result<NewIngredient> {
    let name = normalize_name(&ingredient.name);
    let measurement_unit = normalize_name(&ingredient.measurement_unit);
    check_length("name", &name, RECIPE_NAME_MAX_LEN)?;
    check_length("measurement_unit", &measurement_unit, RECIPE_NAME_MAX_LEN)?;
    Ok(NewIngredient {
        name,
        measurement_unit,
    })
}

/// Accepts `#rrggbb` colors; the stored form is lowercase.
pub fn validate_color(color: &str) -> Result<String> {
    let color = color.trim();
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(ValidationError::invalid_field(
            "color",
            format!("'{color}' is not a #rrggbb hex color"),
        )
        .into());
    }
    Ok(color.to_lowercase())
}

pub fn normalize_tag(tag: &NewTag) -> Result<NewTag> {
    let name = normalize_name(&tag.name);
    let slug = normalize_name(&tag.slug);
    check_length("name", &name, TAG_FIELD_MAX_LEN)?;
    check_length("slug", &slug, TAG_FIELD_MAX_LEN)?;
    if !slug
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::invalid_field(
            "slug",
            "may only contain letters, digits, '-' and '_'",
        )
        .into());
    }
    Ok(NewTag {
        name,
        color: validate_color(&tag.color)?,
        slug,
    })
}

/// Usernames follow the `^[\w.@+-]+$` pattern.
pub fn validate_username(username: &str) -> Result<()> {
    check_length("username", username, USER_FIELD_MAX_LEN)?;
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '@' | '+' | '-'))
    {
        return Err(ValidationError::invalid_field(
            "username",
            "may only contain letters, digits and . @ + - _",
        )
        .into());
    }
    Ok(())
}

pub fn normalize_user(user: &NewUser) -> Result<NewUser> {
    let email = user.email.trim().to_lowercase();
    check_length("email", &email, EMAIL_MAX_LEN)?;
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(ValidationError::invalid_field("email", "is not a valid address").into());
    }
    let username = user.username.trim().to_string();
    validate_username(&username)?;
    let first_name = user.first_name.trim().to_string();
    let last_name = user.last_name.trim().to_string();
    if first_name.chars().count() > USER_FIELD_MAX_LEN
        || last_name.chars().count() > USER_FIELD_MAX_LEN
    {
        return Err(ValidationError::invalid_field(
            "name",
            format!("must be at most {USER_FIELD_MAX_LEN} characters"),
        )
        .into());
    }
    Ok(NewUser {
        email,
        username,
        first_name,
        last_name,
    })
}

/// Parse `1`/`true` and `0`/`false` query flags; anything else is ignored.
#[must_use]
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}
