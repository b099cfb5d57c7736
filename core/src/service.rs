use std::io::Read;
use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::catalog_import::{self, IngredientImportSummary};
use crate::db::Database;
use crate::error::PermissionDenied;
use crate::models::{
    Ingredient, NewIngredient, NewTag, NewUser, Recipe, RecipeDetail, RecipeFilter, RecipePayload,
    RecipeSummary, RegisteredUser, Subscription, Tag, User, UserProfile,
};
use crate::shopping_list::ShoppingList;
use crate::validate::{PayloadMode, validate_recipe_payload};

pub struct FoodgramService {
    db: Database,
}

impl FoodgramService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    // --- Users ---

    pub fn register_user(&self, user: &NewUser) -> Result<RegisteredUser> {
        let registered = self.db.create_user(user)?;
        info!(user_id = registered.user.id, username = %registered.user.username, "registered user");
        Ok(registered)
    }

    pub fn authenticate(&self, token: &str) -> Result<Option<User>> {
        self.db.find_user_by_token(token)
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.db.get_user(id)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        self.db.get_user_by_username(username)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    pub fn user_profile(&self, id: i64, viewer: Option<i64>) -> Result<UserProfile> {
        let user = self.db.get_user(id)?;
        self.db.user_profile(user, viewer)
    }

    pub fn list_profiles(&self, viewer: Option<i64>) -> Result<Vec<UserProfile>> {
        self.db
            .list_users()?
            .into_iter()
            .map(|user| self.db.user_profile(user, viewer))
            .collect()
    }

    // --- Follows ---

    pub fn subscribe(
        &self,
        user_id: i64,
        author_id: i64,
        recipes_limit: Option<usize>,
    ) -> Result<Subscription> {
        self.db.follow(user_id, author_id)?;
        info!(user_id, author_id, "subscribed");
        let author = self.db.get_user(author_id)?;
        self.db.subscription(author, user_id, recipes_limit)
    }

    pub fn unsubscribe(&self, user_id: i64, author_id: i64) -> Result<()> {
        self.db.unfollow(user_id, author_id)?;
        info!(user_id, author_id, "unsubscribed");
        Ok(())
    }

    pub fn subscriptions(&self, user_id: i64, recipes_limit: Option<usize>) -> Result<Vec<Subscription>> {
        self.db.list_subscriptions(user_id, recipes_limit)
    }

    // --- Catalog ---

    pub fn add_tag(&self, tag: &NewTag) -> Result<Tag> {
        let tag = self.db.insert_tag(tag)?;
        info!(tag_id = tag.id, slug = %tag.slug, "added tag");
        Ok(tag)
    }

    pub fn get_tag(&self, id: i64) -> Result<Tag> {
        self.db.get_tag(id)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.db.list_tags()
    }

    pub fn add_ingredient(&self, ingredient: &NewIngredient) -> Result<Ingredient> {
        let ingredient = self.db.insert_ingredient(ingredient)?;
        info!(ingredient_id = ingredient.id, name = %ingredient.name, "added ingredient");
        Ok(ingredient)
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        self.db.get_ingredient(id)
    }

    pub fn list_ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        self.db.list_ingredients(search)
    }

    pub fn import_ingredients<R: Read>(&self, reader: R, dry_run: bool) -> Result<IngredientImportSummary> {
        let rows = catalog_import::parse_ingredient_csv(reader)?;
        let summary = catalog_import::import_ingredients(&self.db, &rows, dry_run)?;
        info!(
            rows = summary.rows_parsed,
            created = summary.created,
            skipped = summary.skipped,
            dry_run,
            "imported ingredients"
        );
        Ok(summary)
    }

    // --- Recipes ---

    /// The recipe if `user_id` wrote it.
    fn owned_recipe(&self, user_id: i64, recipe_id: i64) -> Result<Recipe> {
        let recipe = self.db.get_recipe(recipe_id)?;
        if recipe.author_id != Some(user_id) {
            return Err(PermissionDenied { recipe_id }.into());
        }
        Ok(recipe)
    }

    pub fn publish_recipe(&self, author_id: i64, payload: &RecipePayload) -> Result<RecipeDetail> {
        let validated = validate_recipe_payload(payload, &self.db, PayloadMode::Create)?;
        let recipe = self.db.create_recipe(author_id, &validated)?;
        info!(
            recipe_id = recipe.id,
            author_id,
            ingredients = validated.ingredients.len(),
            "published recipe"
        );
        self.db.recipe_detail(recipe, Some(author_id))
    }

    /// Replace a recipe's tags and line items, and any scalar fields present.
    pub fn update_recipe(
        &self,
        user_id: i64,
        recipe_id: i64,
        payload: &RecipePayload,
    ) -> Result<RecipeDetail> {
        self.owned_recipe(user_id, recipe_id)?;
        let validated = validate_recipe_payload(payload, &self.db, PayloadMode::Update)?;
        let recipe = self.db.update_recipe(recipe_id, &validated)?;
        info!(recipe_id, user_id, "updated recipe");
        self.db.recipe_detail(recipe, Some(user_id))
    }

    pub fn delete_recipe(&self, user_id: i64, recipe_id: i64) -> Result<()> {
        self.owned_recipe(user_id, recipe_id)?;
        self.db.delete_recipe(recipe_id)?;
        info!(recipe_id, user_id, "deleted recipe");
        Ok(())
    }

    pub fn get_recipe(&self, recipe_id: i64, viewer: Option<i64>) -> Result<RecipeDetail> {
        let recipe = self.db.get_recipe(recipe_id)?;
        self.db.recipe_detail(recipe, viewer)
    }

    pub fn list_recipes(&self, filter: &RecipeFilter, viewer: Option<i64>) -> Result<Vec<RecipeDetail>> {
        let recipes = self.db.list_recipes(filter, viewer)?;
        debug!(count = recipes.len(), ?filter, "listed recipes");
        recipes
            .into_iter()
            .map(|recipe| self.db.recipe_detail(recipe, viewer))
            .collect()
    }

    // --- Cart and favorites ---

    pub fn add_to_cart(&self, user_id: i64, recipe_id: i64) -> Result<RecipeSummary> {
        self.db.add_to_cart(user_id, recipe_id)?;
        info!(user_id, recipe_id, "added recipe to cart");
        Ok(self.db.get_recipe(recipe_id)?.into())
    }

    pub fn remove_from_cart(&self, user_id: i64, recipe_id: i64) -> Result<()> {
        self.db.remove_from_cart(user_id, recipe_id)?;
        info!(user_id, recipe_id, "removed recipe from cart");
        Ok(())
    }

    pub fn add_favorite(&self, user_id: i64, recipe_id: i64) -> Result<RecipeSummary> {
        self.db.add_favorite(user_id, recipe_id)?;
        info!(user_id, recipe_id, "favorited recipe");
        Ok(self.db.get_recipe(recipe_id)?.into())
    }

    pub fn remove_favorite(&self, user_id: i64, recipe_id: i64) -> Result<()> {
        self.db.remove_favorite(user_id, recipe_id)?;
        info!(user_id, recipe_id, "unfavorited recipe");
        Ok(())
    }

    /// Aggregate the user's cart into a downloadable shopping list.
    pub fn shopping_list(&self, user: &User, signature: &str, date: NaiveDate) -> Result<ShoppingList> {
        let line_items = self.db.get_cart_line_items(user.id)?;
        let list = ShoppingList::build(&user.username, &line_items, signature, date)?;
        debug!(
            user_id = user.id,
            line_items = line_items.len(),
            items = list.items.len(),
            "built shopping list"
        );
        Ok(list)
    }
}
