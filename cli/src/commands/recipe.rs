use anyhow::Result;

use foodgram_core::models::RecipeFilter;
use foodgram_core::service::FoodgramService;

use super::helpers::print_recipe_table;

pub(crate) fn cmd_recipe_list(
    service: &FoodgramService,
    author: Option<&str>,
    tags: &[String],
    json: bool,
) -> Result<()> {
    let author = author
        .map(|username| service.get_user_by_username(username))
        .transpose()?;
    let filter = RecipeFilter {
        author: author.map(|user| user.id),
        tags: tags.iter().map(|t| t.trim().to_lowercase()).collect(),
        ..RecipeFilter::default()
    };
    let recipes = service.list_recipes(&filter, None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
    } else if recipes.is_empty() {
        eprintln!("No recipes found");
    } else {
        print_recipe_table(&recipes);
    }

    Ok(())
}
