use anyhow::Result;

use foodgram_core::models::NewUser;
use foodgram_core::service::FoodgramService;

use super::helpers::print_user_table;

pub(crate) fn cmd_user_add(service: &FoodgramService, user: &NewUser, json: bool) -> Result<()> {
    let registered = service.register_user(user)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&registered)?);
    } else {
        let username = &registered.user.username;
        let id = registered.user.id;
        println!("Created user: {username} (id: {id})");
        println!("API token (shown once): {}", registered.token);
        println!("Send it as: Authorization: Token <token>");
    }

    Ok(())
}

pub(crate) fn cmd_user_list(service: &FoodgramService, json: bool) -> Result<()> {
    let users = service.list_users()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
    } else if users.is_empty() {
        eprintln!("No users yet. Add one with: foodgram user add <email> <username>");
    } else {
        print_user_table(&users);
    }

    Ok(())
}
