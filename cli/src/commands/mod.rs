mod helpers;
mod ingredient;
mod recipe;
mod shopping_list;
mod tag;
mod user;

pub(crate) use ingredient::{cmd_ingredient_add, cmd_ingredient_import, cmd_ingredient_list};
pub(crate) use recipe::cmd_recipe_list;
pub(crate) use shopping_list::cmd_shopping_list;
pub(crate) use tag::{cmd_tag_add, cmd_tag_list};
pub(crate) use user::{cmd_user_add, cmd_user_list};
