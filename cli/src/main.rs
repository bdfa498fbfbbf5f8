mod client;
mod commands;
mod config;
mod server;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use crate::client::HttpClient;
use crate::commands::{
    Item, RecipeDraft, RecipeEdit, cmd_categories, cmd_grocery, cmd_item_add, cmd_item_delete,
    cmd_item_edit, cmd_item_list, cmd_item_show, cmd_item_toggle, cmd_recipe_add,
    cmd_recipe_change, cmd_recipe_delete, cmd_recipe_edit, cmd_recipe_list, cmd_recipe_show,
    cmd_sync, cmd_tags, json_error,
};
use crate::config::{Config, DEFAULT_API_URL};
use pantry_core::Pantry;
use pantry_core::api::{Endpoints, PantryApi};
use pantry_core::models::{Consumable, Ingredient, ItemKind, ItemPatch, RecipePatch};
use pantry_core::persist::Persistence;

#[derive(Parser)]
#[command(
    name = "pantry",
    version,
    about = "Recipes, pantry items and the grocery list",
    long_about = "Recipes, pantry items and the grocery list.\n\n\
        Reads come from a local cache that is refreshed from the pantry server on\n\
        every run. Changes show up immediately and are rolled back if the server\n\
        rejects them."
)]
struct Cli {
    /// Base URL of the pantry API
    #[arg(long, global = true, env = "PANTRY_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
    /// Directory for the local cache and server database (default: platform data dir)
    #[arg(long, global = true, env = "PANTRY_DATA_DIR", value_name = "PATH")]
    data_dir: Option<PathBuf>,
    /// Skip the startup refresh and read from the local cache only
    #[arg(long, global = true)]
    offline: bool,
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage ingredients
    Ingredient {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Manage household consumables (soap, foil, ...)
    Consumable {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Show the grocery list: every needed ingredient and consumable
    Grocery,
    /// List the tags used across recipes
    Tags,
    /// List category suggestions
    Categories {
        /// Item kind to suggest categories for
        #[arg(value_enum, default_value = "ingredient")]
        kind: KindArg,
    },
    /// Refresh the local cache from the server
    Sync,
    /// Start the pantry REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3001")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Add an item (names are stored lowercased)
    Add {
        /// Item name
        name: String,
        /// Category (e.g. produce, dairy)
        #[arg(short, long, default_value = "")]
        category: String,
        /// Put it on the grocery list right away
        #[arg(long)]
        needed: bool,
    },
    /// List items grouped by category
    List {
        /// Only items on the grocery list
        #[arg(long)]
        needed: bool,
    },
    /// Show one item
    Show {
        /// Item name
        name: String,
    },
    /// Flip whether an item is needed
    Toggle {
        /// Item name
        name: String,
    },
    /// Rename, recategorize or set needed
    Edit {
        /// Item name
        name: String,
        /// New name
        #[arg(long)]
        rename: Option<String>,
        /// New category (empty string clears it)
        #[arg(long)]
        category: Option<String>,
        /// Set needed explicitly
        #[arg(long)]
        needed: Option<bool>,
    },
    /// Delete an item
    Delete {
        /// Item name
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a recipe; unknown ingredients are created
    Add {
        /// Recipe name
        name: String,
        /// Ingredient name (repeatable)
        #[arg(short, long = "ingredient", value_name = "NAME")]
        ingredients: Vec<String>,
        /// Comma separated tags
        #[arg(short, long)]
        tags: Option<String>,
        /// Source URL or reference (repeatable)
        #[arg(short, long = "source", value_name = "SOURCE")]
        sources: Vec<String>,
        /// Free-form notes
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// List recipes, optionally only those carrying every given tag
    List {
        /// Required tag (repeatable)
        #[arg(short, long = "tag", value_name = "TAG")]
        tags: Vec<String>,
    },
    /// Show a recipe with its ingredients and sources
    Show {
        /// Recipe name
        recipe: String,
    },
    /// Rename a recipe or replace its notes
    Edit {
        /// Recipe name
        recipe: String,
        /// New name
        #[arg(long)]
        rename: Option<String>,
        /// New notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Add a tag
    Tag { recipe: String, tag: String },
    /// Remove a tag
    Untag { recipe: String, tag: String },
    /// Add a source
    SourceAdd { recipe: String, source: String },
    /// Remove a source
    SourceRemove { recipe: String, source: String },
    /// Add an ingredient by name, creating it if needed
    Link { recipe: String, ingredient: String },
    /// Remove an ingredient from a recipe (the ingredient itself is kept)
    Unlink { recipe: String, ingredient: String },
    /// Delete a recipe
    Delete {
        /// Recipe name
        recipe: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Ingredient,
    Consumable,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Ingredient => ItemKind::Ingredient,
            KindArg::Consumable => ItemKind::Consumable,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli).await {
        if json {
            println!("{}", json_error(&format!("{e:#}")));
        } else {
            eprintln!("Error: {e:#}");
        }
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.data_dir, &cli.api_url)?;

    if let Commands::Serve { port, bind } = &cli.command {
        return server::start_server(&config.server_db_path, *port, bind).await;
    }

    let client = HttpClient::new(&config.api_url)?;
    let pantry = Pantry::new(Arc::new(client), Persistence::open(&config.cache_path));
    let flusher = tokio::spawn(pantry.flusher(config.flush_interval));

    if cli.offline {
        if !pantry.is_loaded() {
            bail!("No cached data yet. Run once without --offline");
        }
    } else if !matches!(cli.command, Commands::Sync) {
        if let Err(e) = pantry.sync().await {
            if !pantry.is_loaded() {
                return Err(e.into());
            }
            eprintln!("Warning: {e}. Showing cached data.");
        }
    }

    let result = dispatch(&pantry, cli.command, cli.offline, cli.json).await;
    pantry.save_now();
    flusher.abort();
    result
}

async fn dispatch<A: PantryApi>(
    pantry: &Pantry<A>,
    command: Commands,
    offline: bool,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Ingredient { command } => {
            run_items::<Ingredient, A>(pantry, command, offline, json).await
        }
        Commands::Consumable { command } => {
            run_items::<Consumable, A>(pantry, command, offline, json).await
        }
        Commands::Recipe { command } => run_recipes(pantry, command, offline, json).await,
        Commands::Grocery => cmd_grocery(pantry, json),
        Commands::Tags => cmd_tags(pantry, json),
        Commands::Categories { kind } => cmd_categories(pantry, kind.into(), offline, json).await,
        Commands::Sync => cmd_sync(pantry, json).await,
        Commands::Serve { .. } => bail!("serve does not run against the local cache"),
    }
}

async fn run_items<T, A>(
    pantry: &Pantry<A>,
    command: ItemCommands,
    offline: bool,
    json: bool,
) -> Result<()>
where
    T: Item,
    A: PantryApi + Endpoints<T>,
{
    match command {
        ItemCommands::Add {
            name,
            category,
            needed,
        } => cmd_item_add::<T, A>(pantry, &name, &category, needed, json).await,
        ItemCommands::List { needed } => cmd_item_list::<T, A>(pantry, needed, json),
        ItemCommands::Show { name } => cmd_item_show::<T, A>(pantry, &name, offline, json).await,
        ItemCommands::Toggle { name } => cmd_item_toggle::<T, A>(pantry, &name, json).await,
        ItemCommands::Edit {
            name,
            rename,
            category,
            needed,
        } => {
            let patch = ItemPatch {
                name: rename,
                category,
                needed,
            };
            cmd_item_edit::<T, A>(pantry, &name, patch, json).await
        }
        ItemCommands::Delete { name, yes } => {
            cmd_item_delete::<T, A>(pantry, &name, yes, json).await
        }
    }
}

async fn run_recipes<A: PantryApi>(
    pantry: &Pantry<A>,
    command: RecipeCommands,
    offline: bool,
    json: bool,
) -> Result<()> {
    match command {
        RecipeCommands::Add {
            name,
            ingredients,
            tags,
            sources,
            notes,
        } => {
            let draft = RecipeDraft {
                name: &name,
                notes: &notes,
                ingredients: &ingredients,
                tags: tags.as_deref(),
                sources: &sources,
            };
            cmd_recipe_add(pantry, draft, json).await
        }
        RecipeCommands::List { tags } => cmd_recipe_list(pantry, &tags, json),
        RecipeCommands::Show { recipe } => cmd_recipe_show(pantry, &recipe, offline, json).await,
        RecipeCommands::Edit {
            recipe,
            rename,
            notes,
        } => {
            let patch = RecipePatch {
                name: rename,
                notes,
            };
            cmd_recipe_edit(pantry, &recipe, patch, json).await
        }
        RecipeCommands::Tag { recipe, tag } => {
            cmd_recipe_change(pantry, &recipe, RecipeEdit::AddTag(&tag), json).await
        }
        RecipeCommands::Untag { recipe, tag } => {
            cmd_recipe_change(pantry, &recipe, RecipeEdit::RemoveTag(&tag), json).await
        }
        RecipeCommands::SourceAdd { recipe, source } => {
            cmd_recipe_change(pantry, &recipe, RecipeEdit::AddSource(&source), json).await
        }
        RecipeCommands::SourceRemove { recipe, source } => {
            cmd_recipe_change(pantry, &recipe, RecipeEdit::RemoveSource(&source), json).await
        }
        RecipeCommands::Link { recipe, ingredient } => {
            cmd_recipe_change(pantry, &recipe, RecipeEdit::Link(&ingredient), json).await
        }
        RecipeCommands::Unlink { recipe, ingredient } => {
            cmd_recipe_change(pantry, &recipe, RecipeEdit::Unlink(&ingredient), json).await
        }
        RecipeCommands::Delete { recipe, yes } => {
            cmd_recipe_delete(pantry, &recipe, yes, json).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pantry",
            "recipe",
            "list",
            "--tag",
            "quick",
            "--tag",
            "vegetarian",
            "--json",
            "--offline",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(cli.offline);
        match cli.command {
            Commands::Recipe {
                command: RecipeCommands::List { tags },
            } => assert_eq!(tags, vec!["quick", "vegetarian"]),
            _ => panic!("expected recipe list"),
        }
    }

    #[test]
    fn test_item_edit_parses_optional_fields() {
        let cli = Cli::try_parse_from([
            "pantry",
            "consumable",
            "edit",
            "soap",
            "--category",
            "household",
            "--needed",
            "true",
        ])
        .unwrap();
        match cli.command {
            Commands::Consumable {
                command:
                    ItemCommands::Edit {
                        name,
                        rename,
                        category,
                        needed,
                    },
            } => {
                assert_eq!(name, "soap");
                assert_eq!(rename, None);
                assert_eq!(category.as_deref(), Some("household"));
                assert_eq!(needed, Some(true));
            }
            _ => panic!("expected consumable edit"),
        }
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["pantry", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { port, bind } => {
                assert_eq!(port, 3001);
                assert_eq!(bind, "127.0.0.1");
            }
            _ => panic!("expected serve"),
        }
    }
}
