mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_ingredient_add, cmd_ingredient_import, cmd_ingredient_list, cmd_recipe_list,
    cmd_shopping_list, cmd_tag_add, cmd_tag_list, cmd_user_add, cmd_user_list,
};
use crate::config::Config;
use foodgram_core::models::{NewTag, NewUser};
use foodgram_core::service::FoodgramService;

#[derive(Parser)]
#[command(
    name = "foodgram",
    version,
    about = "Recipe sharing backend: REST API server and management CLI"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
    /// Manage users and their API tokens
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage recipe tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage the ingredient catalog
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Browse published recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Print or save a user's aggregated shopping list
    ShoppingList {
        /// Username whose cart to aggregate
        username: String,
        /// Write the list to this file (or into this directory) instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user and print their API token
    Add {
        /// Email address
        email: String,
        /// Username (letters, digits and . @ + - _)
        username: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Add a tag
    Add {
        /// Tag name
        name: String,
        /// Hex color (e.g. "#E26C2D")
        color: String,
        /// URL slug
        slug: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List tags
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// Add an ingredient
    Add {
        /// Ingredient name
        name: String,
        /// Measurement unit (e.g. "g", "ml", "pcs")
        unit: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List/search ingredients
    List {
        /// Name search (prefix matches first)
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import ingredients from a headerless `name,unit` CSV file
    Import {
        /// Path to the CSV file
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List recipes, newest first
    List {
        /// Only recipes by this username
        #[arg(long)]
        author: Option<String>,
        /// Only recipes with any of these tag slugs
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Serve { .. }) {
        init_tracing();
    }

    let config = Config::load()?;
    let service = FoodgramService::new(&config.db_path)?;

    match cli.command {
        Commands::Serve { port, bind } => {
            server::start_server(service, port, &bind, &config.signature).await
        }
        Commands::User { command } => match command {
            UserCommands::Add {
                email,
                username,
                first_name,
                last_name,
                json,
            } => cmd_user_add(
                &service,
                &NewUser {
                    email,
                    username,
                    first_name,
                    last_name,
                },
                json,
            ),
            UserCommands::List { json } => cmd_user_list(&service, json),
        },
        Commands::Tag { command } => match command {
            TagCommands::Add {
                name,
                color,
                slug,
                json,
            } => cmd_tag_add(&service, &NewTag { name, color, slug }, json),
            TagCommands::List { json } => cmd_tag_list(&service, json),
        },
        Commands::Ingredient { command } => match command {
            IngredientCommands::Add { name, unit, json } => {
                cmd_ingredient_add(&service, &name, &unit, json)
            }
            IngredientCommands::List { search, json } => {
                cmd_ingredient_list(&service, search.as_deref(), json)
            }
            IngredientCommands::Import {
                file,
                dry_run,
                json,
            } => cmd_ingredient_import(&service, &file, dry_run, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::List { author, tags, json } => {
                cmd_recipe_list(&service, author.as_deref(), &tags, json)
            }
        },
        Commands::ShoppingList { username, output } => {
            cmd_shopping_list(&service, &username, &config.signature, output.as_deref())
        }
    }
}
