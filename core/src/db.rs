use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use sha2::{Digest, Sha256};

use crate::error::{NotFound, RelationError, ValidationError};
use crate::models::{
    CartEntry, FavoriteEntry, Follow, Ingredient, LineItem, NewIngredient, NewTag, NewUser,
    Recipe, RecipeDetail, RecipeFilter, RecipeIngredient, RecipeSummary, RegisteredUser,
    Subscription, Tag, User, UserProfile, normalize_ingredient, normalize_tag, normalize_user,
};
use crate::shopping_list::CartLineItem;
use crate::validate::{RecipeCatalog, ValidatedRecipe};

const USER_COLUMNS: &str = "id, email, username, first_name, last_name, is_active, created_at";
const RECIPE_COLUMNS: &str =
    "r.id, r.name, r.author_id, r.text, r.cooking_time, r.image, r.pub_date";

/// Per-user recipe lists that share a table shape: `(id, user_id, recipe_id, added_at)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecipeList {
    Cart,
    Favorites,
}

impl RecipeList {
    fn table(self) -> &'static str {
        match self {
            Self::Cart => "cart_entries",
            Self::Favorites => "favorites",
        }
    }

    fn already_present(self) -> RelationError {
        match self {
            Self::Cart => RelationError::AlreadyInCart,
            Self::Favorites => RelationError::AlreadyFavorited,
        }
    }

    fn missing(self) -> RelationError {
        match self {
            Self::Cart => RelationError::NotInCart,
            Self::Favorites => RelationError::NotFavorited,
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Begin a transaction on the shared connection. Calls made through
    /// `self` until it is committed belong to it; dropping it rolls back.
    pub fn transaction(&self) -> Result<rusqlite::Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .context("Failed to begin transaction")
    }

    fn migrate(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    username TEXT NOT NULL UNIQUE,
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 1,
                    token_hash TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    color TEXT NOT NULL UNIQUE,
                    slug TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    measurement_unit TEXT NOT NULL,
                    UNIQUE (name, measurement_unit)
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    author_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    text TEXT NOT NULL,
                    cooking_time INTEGER NOT NULL CHECK (cooking_time >= 1),
                    image TEXT,
                    pub_date TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_tags (
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (recipe_id, tag_id)
                );

                CREATE TABLE IF NOT EXISTS ingredient_amounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
                    amount INTEGER NOT NULL CHECK (amount > 0),
                    UNIQUE (recipe_id, ingredient_id)
                );

                CREATE TABLE IF NOT EXISTS cart_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    added_at TEXT NOT NULL,
                    UNIQUE (user_id, recipe_id)
                );

                CREATE TABLE IF NOT EXISTS favorites (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    added_at TEXT NOT NULL,
                    UNIQUE (user_id, recipe_id)
                );

                CREATE TABLE IF NOT EXISTS follows (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    following_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    UNIQUE (user_id, following_id),
                    CHECK (user_id <> following_id)
                );

                CREATE INDEX IF NOT EXISTS idx_recipes_author ON recipes(author_id);
                CREATE INDEX IF NOT EXISTS idx_recipes_pub_date ON recipes(pub_date);
                CREATE INDEX IF NOT EXISTS idx_ingredients_name ON ingredients(name);
                CREATE INDEX IF NOT EXISTS idx_ingredient_amounts_recipe ON ingredient_amounts(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_cart_entries_user ON cart_entries(user_id);
                CREATE INDEX IF NOT EXISTS idx_favorites_user ON favorites(user_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            is_active: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn tag_from_row(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            color: row.get(2)?,
            slug: row.get(3)?,
        })
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            measurement_unit: row.get(2)?,
        })
    }

    // Expects RECIPE_COLUMNS in order.
    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            name: row.get(1)?,
            author_id: row.get(2)?,
            text: row.get(3)?,
            cooking_time: row.get(4)?,
            image: row.get(5)?,
            pub_date: row.get(6)?,
        })
    }

    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    // --- Users ---

    pub fn create_user(&self, user: &NewUser) -> Result<RegisteredUser> {
        let user = normalize_user(user)?;
        let taken: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT email, username FROM users WHERE email = ?1 OR username = ?2",
                params![user.email, user.username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((email, _)) = taken {
            let field = if email == user.email {
                "email"
            } else {
                "username"
            };
            return Err(ValidationError::invalid_field(field, "is already registered").into());
        }

        let token = generate_token();
        let now = timestamp();
        self.conn.execute(
            "INSERT INTO users (email, username, first_name, last_name, is_active, token_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
            params![
                user.email,
                user.username,
                user.first_name,
                user.last_name,
                hash_token(&token),
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(RegisteredUser {
            user: self.get_user(id)?,
            token,
        })
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                Self::user_from_row,
            )
            .optional()?
            .ok_or_else(|| NotFound::new("User", id).into())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                Self::user_from_row,
            )
            .context(format!("User '{username}' not found"))
    }

    /// Resolve an API token to its active owner.
    pub fn find_user_by_token(&self, token: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE token_hash = ?1 AND is_active = 1"),
                params![hash_token(token)],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        if rows == 0 {
            return Err(NotFound::new("User", id).into());
        }
        Ok(())
    }

    pub fn delete_user(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// A user's public profile as seen by `viewer`.
    pub fn user_profile(&self, user: User, viewer: Option<i64>) -> Result<UserProfile> {
        let is_subscribed = match viewer {
            Some(viewer_id) if viewer_id != user.id => self.is_following(viewer_id, user.id)?,
            _ => false,
        };
        Ok(UserProfile::new(user, is_subscribed))
    }

    // --- Tags ---

    pub fn insert_tag(&self, tag: &NewTag) -> Result<Tag> {
        let tag = normalize_tag(tag)?;
        let clash: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT name, color, slug FROM tags WHERE name = ?1 OR color = ?2 OR slug = ?3",
                params![tag.name, tag.color, tag.slug],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        if let Some((name, color, _)) = clash {
            let field = if name == tag.name {
                "name"
            } else if color == tag.color {
                "color"
            } else {
                "slug"
            };
            return Err(ValidationError::invalid_field(field, "is already used by another tag").into());
        }

        self.conn.execute(
            "INSERT INTO tags (name, color, slug) VALUES (?1, ?2, ?3)",
            params![tag.name, tag.color, tag.slug],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_tag(id)
    }

    pub fn get_tag(&self, id: i64) -> Result<Tag> {
        self.conn
            .query_row(
                "SELECT id, name, color, slug FROM tags WHERE id = ?1",
                params![id],
                Self::tag_from_row,
            )
            .optional()?
            .ok_or_else(|| NotFound::new("Tag", id).into())
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, color, slug FROM tags ORDER BY name")?;
        let tags = stmt
            .query_map([], Self::tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    // --- Ingredients ---

    pub fn insert_ingredient(&self, ingredient: &NewIngredient) -> Result<Ingredient> {
        let ingredient = normalize_ingredient(ingredient)?;
        if self
            .find_ingredient(&ingredient.name, &ingredient.measurement_unit)?
            .is_some()
        {
            return Err(ValidationError::invalid_field(
                "name",
                format!(
                    "'{}' in '{}' already exists",
                    ingredient.name, ingredient.measurement_unit
                ),
            )
            .into());
        }
        self.conn.execute(
            "INSERT INTO ingredients (name, measurement_unit) VALUES (?1, ?2)",
            params![ingredient.name, ingredient.measurement_unit],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_ingredient(id)
    }

    pub fn find_ingredient(&self, name: &str, measurement_unit: &str) -> Result<Option<Ingredient>> {
        let ingredient = self
            .conn
            .query_row(
                "SELECT id, name, measurement_unit FROM ingredients
                 WHERE name = ?1 AND measurement_unit = ?2",
                params![name, measurement_unit],
                Self::ingredient_from_row,
            )
            .optional()?;
        Ok(ingredient)
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        self.conn
            .query_row(
                "SELECT id, name, measurement_unit FROM ingredients WHERE id = ?1",
                params![id],
                Self::ingredient_from_row,
            )
            .optional()?
            .ok_or_else(|| NotFound::new("Ingredient", id).into())
    }

    /// Case-insensitive name search: prefix matches first, then the
    /// remaining substring matches, each group sorted by name.
    pub fn search_ingredients(&self, query: &str) -> Result<Vec<Ingredient>> {
        let escaped = query
            .trim()
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let prefix = format!("{escaped}%");
        let contains = format!("%{escaped}%");
        let mut stmt = self.conn.prepare(
            "SELECT id, name, measurement_unit FROM ingredients
             WHERE name LIKE ?2 ESCAPE '\\'
             ORDER BY CASE WHEN name LIKE ?1 ESCAPE '\\' THEN 0 ELSE 1 END, name, measurement_unit",
        )?;
        let ingredients = stmt
            .query_map(params![prefix, contains], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn list_ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        if let Some(query) = search.filter(|q| !q.trim().is_empty()) {
            return self.search_ingredients(query);
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, name, measurement_unit FROM ingredients ORDER BY name, measurement_unit",
        )?;
        let ingredients = stmt
            .query_map([], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    // --- Recipes ---

    /// Write tag links and line items for a recipe whose previous links are gone.
    fn insert_recipe_links(
        conn: &Connection,
        recipe_id: i64,
        recipe: &ValidatedRecipe,
    ) -> Result<()> {
        let mut tag_stmt =
            conn.prepare("INSERT INTO recipe_tags (recipe_id, tag_id) VALUES (?1, ?2)")?;
        for tag_id in &recipe.tags {
            tag_stmt.execute(params![recipe_id, tag_id])?;
        }
        let mut item_stmt = conn.prepare(
            "INSERT INTO ingredient_amounts (recipe_id, ingredient_id, amount) VALUES (?1, ?2, ?3)",
        )?;
        for (ingredient, amount) in &recipe.ingredients {
            item_stmt.execute(params![recipe_id, ingredient.id, amount])?;
        }
        Ok(())
    }

    /// Store a validated recipe with its tags and line items in one transaction.
    pub fn create_recipe(&self, author_id: i64, recipe: &ValidatedRecipe) -> Result<Recipe> {
        let (Some(name), Some(text), Some(cooking_time)) =
            (&recipe.name, &recipe.text, recipe.cooking_time)
        else {
            return Err(ValidationError::invalid_field(
                "recipe",
                "name, text and cooking_time are required",
            )
            .into());
        };

        let now = timestamp();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO recipes (name, author_id, text, cooking_time, image, pub_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, author_id, text, cooking_time, recipe.image, now],
        )?;
        let id = tx.last_insert_rowid();
        Self::insert_recipe_links(&tx, id, recipe)?;
        tx.commit()?;

        self.get_recipe(id)
    }

    /// Update scalar fields that are present and replace the tag and line
    /// item sets wholesale, all in one transaction.
    pub fn update_recipe(&self, id: i64, recipe: &ValidatedRecipe) -> Result<Recipe> {
        self.get_recipe(id)?;

        let tx = self.conn.unchecked_transaction()?;
        if let Some(name) = &recipe.name {
            tx.execute("UPDATE recipes SET name = ?1 WHERE id = ?2", params![name, id])?;
        }
        if let Some(text) = &recipe.text {
            tx.execute("UPDATE recipes SET text = ?1 WHERE id = ?2", params![text, id])?;
        }
        if let Some(cooking_time) = recipe.cooking_time {
            tx.execute(
                "UPDATE recipes SET cooking_time = ?1 WHERE id = ?2",
                params![cooking_time, id],
            )?;
        }
        if let Some(image) = &recipe.image {
            tx.execute("UPDATE recipes SET image = ?1 WHERE id = ?2", params![image, id])?;
        }
        tx.execute("DELETE FROM recipe_tags WHERE recipe_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM ingredient_amounts WHERE recipe_id = ?1",
            params![id],
        )?;
        Self::insert_recipe_links(&tx, id, recipe)?;
        tx.commit()?;

        self.get_recipe(id)
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .optional()?
            .ok_or_else(|| NotFound::new("Recipe", id).into())
    }

    pub fn get_recipe_tags(&self, recipe_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.color, t.slug
             FROM recipe_tags rt JOIN tags t ON t.id = rt.tag_id
             WHERE rt.recipe_id = ?1
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![recipe_id], Self::tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    pub fn get_recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.measurement_unit, ia.amount
             FROM ingredient_amounts ia JOIN ingredients i ON i.id = ia.ingredient_id
             WHERE ia.recipe_id = ?1
             ORDER BY ia.id",
        )?;
        let ingredients = stmt
            .query_map(params![recipe_id], |row| {
                Ok(RecipeIngredient {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    measurement_unit: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn get_line_items(&self, recipe_id: i64) -> Result<Vec<LineItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recipe_id, ingredient_id, amount FROM ingredient_amounts
             WHERE recipe_id = ?1 ORDER BY id",
        )?;
        let items = stmt
            .query_map(params![recipe_id], |row| {
                Ok(LineItem {
                    id: row.get(0)?,
                    recipe_id: row.get(1)?,
                    ingredient_id: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Recipes newest first, narrowed by `filter`. The favorite and cart
    /// filters are relative to `viewer`; an anonymous viewer asking for
    /// only favorited or carted recipes gets nothing.
    pub fn list_recipes(&self, filter: &RecipeFilter, viewer: Option<i64>) -> Result<Vec<Recipe>> {
        let mut sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes r WHERE 1 = 1");
        let mut args: Vec<SqlValue> = Vec::new();

        for (flag, table) in [
            (filter.is_favorited, "favorites"),
            (filter.is_in_shopping_cart, "cart_entries"),
        ] {
            match (flag, viewer) {
                (Some(true), None) => return Ok(Vec::new()),
                (Some(wanted), Some(user_id)) => {
                    let op = if wanted { "IN" } else { "NOT IN" };
                    let _ = write!(
                        sql,
                        " AND r.id {op} (SELECT recipe_id FROM {table} WHERE user_id = ?)"
                    );
                    args.push(SqlValue::Integer(user_id));
                }
                _ => {}
            }
        }

        if let Some(author_id) = filter.author {
            sql.push_str(" AND r.author_id = ?");
            args.push(SqlValue::Integer(author_id));
        }

        if !filter.tags.is_empty() {
            let _ = write!(
                sql,
                " AND r.id IN (SELECT rt.recipe_id FROM recipe_tags rt
                   JOIN tags t ON t.id = rt.tag_id WHERE t.slug IN ({}))",
                Self::placeholders(filter.tags.len())
            );
            args.extend(filter.tags.iter().map(|slug| SqlValue::Text(slug.clone())));
        }

        sql.push_str(" ORDER BY r.pub_date DESC, r.id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let recipes = stmt
            .query_map(params_from_iter(args), Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn list_recipes_by_author(&self, author_id: i64, limit: Option<usize>) -> Result<Vec<Recipe>> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.author_id = ?1
             ORDER BY r.pub_date DESC, r.id DESC LIMIT ?2"
        ))?;
        let recipes = stmt
            .query_map(params![author_id, limit], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn count_recipes_by_author(&self, author_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM recipes WHERE author_id = ?1",
            params![author_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Full recipe representation as seen by `viewer`.
    pub fn recipe_detail(&self, recipe: Recipe, viewer: Option<i64>) -> Result<RecipeDetail> {
        let author = match recipe.author_id {
            Some(author_id) => {
                let user = self.get_user(author_id)?;
                Some(self.user_profile(user, viewer)?)
            }
            None => None,
        };
        let (is_favorited, is_in_shopping_cart) = match viewer {
            Some(user_id) => (
                self.is_favorited(user_id, recipe.id)?,
                self.is_in_cart(user_id, recipe.id)?,
            ),
            None => (false, false),
        };

        Ok(RecipeDetail {
            id: recipe.id,
            tags: self.get_recipe_tags(recipe.id)?,
            author,
            ingredients: self.get_recipe_ingredients(recipe.id)?,
            is_favorited,
            is_in_shopping_cart,
            name: recipe.name,
            image: recipe.image,
            text: recipe.text,
            cooking_time: recipe.cooking_time,
            pub_date: recipe.pub_date,
        })
    }

    // --- Cart and favorites ---

    fn contains_recipe(&self, list: RecipeList, user_id: i64, recipe_id: i64) -> Result<bool> {
        let exists = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE user_id = ?1 AND recipe_id = ?2)",
                list.table()
            ),
            params![user_id, recipe_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn add_recipe(
        &self,
        list: RecipeList,
        user_id: i64,
        recipe_id: i64,
    ) -> Result<(i64, String)> {
        self.get_recipe(recipe_id)?;
        if self.contains_recipe(list, user_id, recipe_id)? {
            return Err(list.already_present().into());
        }
        let now = timestamp();
        self.conn.execute(
            &format!(
                "INSERT INTO {} (user_id, recipe_id, added_at) VALUES (?1, ?2, ?3)",
                list.table()
            ),
            params![user_id, recipe_id, now],
        )?;
        Ok((self.conn.last_insert_rowid(), now))
    }

    fn remove_recipe(&self, list: RecipeList, user_id: i64, recipe_id: i64) -> Result<()> {
        self.get_recipe(recipe_id)?;
        let rows = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE user_id = ?1 AND recipe_id = ?2",
                list.table()
            ),
            params![user_id, recipe_id],
        )?;
        if rows == 0 {
            return Err(list.missing().into());
        }
        Ok(())
    }

    pub fn add_to_cart(&self, user_id: i64, recipe_id: i64) -> Result<CartEntry> {
        let (id, added_at) = self.add_recipe(RecipeList::Cart, user_id, recipe_id)?;
        Ok(CartEntry {
            id,
            user_id,
            recipe_id,
            added_at,
        })
    }

    pub fn remove_from_cart(&self, user_id: i64, recipe_id: i64) -> Result<()> {
        self.remove_recipe(RecipeList::Cart, user_id, recipe_id)
    }

    pub fn is_in_cart(&self, user_id: i64, recipe_id: i64) -> Result<bool> {
        self.contains_recipe(RecipeList::Cart, user_id, recipe_id)
    }

    pub fn add_favorite(&self, user_id: i64, recipe_id: i64) -> Result<FavoriteEntry> {
        let (id, added_at) = self.add_recipe(RecipeList::Favorites, user_id, recipe_id)?;
        Ok(FavoriteEntry {
            id,
            user_id,
            recipe_id,
            added_at,
        })
    }

    pub fn remove_favorite(&self, user_id: i64, recipe_id: i64) -> Result<()> {
        self.remove_recipe(RecipeList::Favorites, user_id, recipe_id)
    }

    pub fn is_favorited(&self, user_id: i64, recipe_id: i64) -> Result<bool> {
        self.contains_recipe(RecipeList::Favorites, user_id, recipe_id)
    }

    /// Every line item of every recipe in the user's cart, by recipe then line.
    pub fn get_cart_line_items(&self, user_id: i64) -> Result<Vec<CartLineItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT ia.recipe_id, i.name, i.measurement_unit, ia.amount
             FROM ingredient_amounts ia
             JOIN cart_entries c ON c.recipe_id = ia.recipe_id
             JOIN ingredients i ON i.id = ia.ingredient_id
             WHERE c.user_id = ?1
             ORDER BY ia.recipe_id, ia.id",
        )?;
        let items = stmt
            .query_map(params![user_id], |row| {
                Ok(CartLineItem {
                    recipe_id: row.get(0)?,
                    ingredient_name: row.get(1)?,
                    measurement_unit: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    // --- Follows ---

    pub fn follow(&self, user_id: i64, following_id: i64) -> Result<Follow> {
        if user_id == following_id {
            return Err(RelationError::SelfFollow.into());
        }
        self.get_user(following_id)?;
        if self.is_following(user_id, following_id)? {
            return Err(RelationError::AlreadyFollowing.into());
        }
        self.conn.execute(
            "INSERT INTO follows (user_id, following_id) VALUES (?1, ?2)",
            params![user_id, following_id],
        )?;
        Ok(Follow {
            id: self.conn.last_insert_rowid(),
            user_id,
            following_id,
        })
    }

    pub fn unfollow(&self, user_id: i64, following_id: i64) -> Result<()> {
        self.get_user(following_id)?;
        let rows = self.conn.execute(
            "DELETE FROM follows WHERE user_id = ?1 AND following_id = ?2",
            params![user_id, following_id],
        )?;
        if rows == 0 {
            return Err(RelationError::NotFollowing.into());
        }
        Ok(())
    }

    pub fn is_following(&self, user_id: i64, following_id: i64) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE user_id = ?1 AND following_id = ?2)",
            params![user_id, following_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn list_following(&self, user_id: i64) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.email, u.username, u.first_name, u.last_name, u.is_active, u.created_at
             FROM follows f JOIN users u ON u.id = f.following_id
             WHERE f.user_id = ?1
             ORDER BY u.id",
        )?;
        let users = stmt
            .query_map(params![user_id], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Subscription card for one author: profile, latest recipes and total count.
    pub fn subscription(
        &self,
        author: User,
        viewer: i64,
        recipes_limit: Option<usize>,
    ) -> Result<Subscription> {
        let recipes = self
            .list_recipes_by_author(author.id, recipes_limit)?
            .into_iter()
            .map(RecipeSummary::from)
            .collect();
        let recipes_count = self.count_recipes_by_author(author.id)?;
        Ok(Subscription {
            author: self.user_profile(author, Some(viewer))?,
            recipes,
            recipes_count,
        })
    }

    pub fn list_subscriptions(
        &self,
        user_id: i64,
        recipes_limit: Option<usize>,
    ) -> Result<Vec<Subscription>> {
        self.list_following(user_id)?
            .into_iter()
            .map(|author| self.subscription(author, user_id, recipes_limit))
            .collect()
    }
}

impl RecipeCatalog for Database {
    fn existing_tag_ids(&self, ids: &[i64]) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM tags WHERE id IN ({})",
            Self::placeholders(ids.len())
        ))?;
        let found = stmt
            .query_map(params_from_iter(ids), |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    }

    fn lookup_ingredients(&self, ids: &[i64]) -> Result<Vec<Ingredient>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, name, measurement_unit FROM ingredients WHERE id IN ({}) ORDER BY id",
            Self::placeholders(ids.len())
        ))?;
        let found = stmt
            .query_map(params_from_iter(ids), Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    }
}

// Fixed-width so stored timestamps sort lexically.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
