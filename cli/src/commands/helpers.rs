use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use foodgram_core::models::{Ingredient, RecipeDetail, Tag, User};

pub(crate) fn print_user_table(users: &[User]) {
    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Username")]
        username: String,
        #[tabled(rename = "Email")]
        email: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Active")]
        active: &'static str,
    }

    let rows: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            id: u.id,
            username: truncate(&u.username, 30),
            email: truncate(&u.email, 35),
            name: truncate(format!("{} {}", u.first_name, u.last_name).trim(), 30),
            active: if u.is_active { "yes" } else { "no" },
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn print_tag_table(tags: &[Tag]) {
    #[derive(Tabled)]
    struct TagRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Color")]
        color: String,
        #[tabled(rename = "Slug")]
        slug: String,
    }

    let rows: Vec<TagRow> = tags
        .iter()
        .map(|t| TagRow {
            id: t.id,
            name: t.name.clone(),
            color: t.color.clone(),
            slug: t.slug.clone(),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn print_ingredient_table(ingredients: &[Ingredient]) {
    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Unit")]
        unit: String,
    }

    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|i| IngredientRow {
            id: i.id,
            name: truncate(&i.name, 40),
            unit: i.measurement_unit.clone(),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn print_recipe_table(recipes: &[RecipeDetail]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Author")]
        author: String,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
        #[tabled(rename = "Minutes")]
        minutes: i64,
        #[tabled(rename = "Published")]
        published: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 35),
            author: r
                .author
                .as_ref()
                .map_or_else(|| "-".to_string(), |a| a.username.clone()),
            tags: truncate(
                &r.tags
                    .iter()
                    .map(|t| t.slug.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                30,
            ),
            ingredients: r.ingredients.len(),
            minutes: r.cooking_time,
            published: r.pub_date.chars().take(10).collect(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
