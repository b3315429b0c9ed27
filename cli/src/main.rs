mod commands;
mod config;
mod remote;
mod rowstore;
mod server;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    RecipeEdit, RecipeFields, cmd_add, cmd_categories, cmd_delete, cmd_edit, cmd_favorite,
    cmd_list, cmd_queue, cmd_show, cmd_status, cmd_sync,
};
use crate::config::Config;
use crate::remote::HttpRemote;
use crate::rowstore::RowStore;
use recipehub_core::connectivity::ConnectivityMonitor;
use recipehub_core::models::RecipeFilter;
use recipehub_core::store::LocalStore;
use recipehub_core::sync::DrainOutcome;
use recipehub_core::{HubConfig, RecipeHub};

#[derive(Parser)]
#[command(
    name = "recipehub",
    version,
    about = "An offline-first recipe collection CLI",
    long_about = "Keeps your recipes in a local cache that works offline. Changes made \
                  without a connection are queued and replayed against the remote store \
                  once it is reachable again."
)]
struct Cli {
    #[command(flatten)]
    remote: RemoteArgs,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RemoteArgs {
    /// Base URL of the remote store
    #[arg(
        long,
        global = true,
        env = "RECIPEHUB_REMOTE_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    remote: String,
    /// Bearer token for the remote store
    #[arg(long, global = true, env = "RECIPEHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// User whose recipes are cached
    #[arg(long, global = true, env = "RECIPEHUB_USER_ID", default_value = "local-user")]
    user: String,
    /// Work offline: every write is queued
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached recipes
    List {
        /// Match a substring of the name or description
        #[arg(short, long)]
        search: Option<String>,
        /// Only recipes in this category (ID)
        #[arg(short, long)]
        category: Option<String>,
        /// Only favorites
        #[arg(short, long)]
        favorites: bool,
        /// Recipes shared with you instead of your own
        #[arg(long)]
        shared: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its ingredients and steps
    Show {
        /// Recipe ID or exact name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a recipe
    Add {
        /// Recipe name
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Category ID
        #[arg(short, long)]
        category: Option<String>,
        /// Preparation time in minutes
        #[arg(long)]
        prep: Option<u32>,
        /// Cooking time in minutes
        #[arg(long)]
        cook: Option<u32>,
        #[arg(long)]
        servings: Option<u32>,
        /// Ingredient as "name", "name=3" or "name=200 g" (repeatable, in order)
        #[arg(short, long = "ingredient", value_name = "INGREDIENT")]
        ingredients: Vec<String>,
        /// Preparation step (repeatable, in order)
        #[arg(short = 't', long = "step", value_name = "STEP")]
        steps: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a recipe's fields, ingredients or steps
    Edit {
        /// Recipe ID or exact name
        recipe: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long, conflicts_with = "clear_description")]
        description: Option<String>,
        #[arg(long)]
        clear_description: bool,
        /// Category ID
        #[arg(short, long, conflicts_with = "clear_category")]
        category: Option<String>,
        #[arg(long)]
        clear_category: bool,
        /// Preparation time in minutes
        #[arg(long)]
        prep: Option<u32>,
        /// Cooking time in minutes
        #[arg(long)]
        cook: Option<u32>,
        #[arg(long)]
        servings: Option<u32>,
        /// Replace all ingredients (repeatable, in order)
        #[arg(short, long = "ingredient", value_name = "INGREDIENT")]
        ingredients: Vec<String>,
        /// Replace all steps (repeatable, in order)
        #[arg(short = 't', long = "step", value_name = "STEP")]
        steps: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Toggle a recipe's favorite flag
    Favorite {
        /// Recipe ID or exact name
        recipe: String,
        /// Set the flag instead of toggling it
        #[arg(long, value_name = "BOOL")]
        set: Option<bool>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe ID or exact name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipe categories
    Categories {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show mutations waiting to be synced
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show connectivity, cache and queue state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay queued changes and refresh the cache
    Sync {
        /// Keep running, re-checking the remote and syncing when it comes back
        #[arg(short, long)]
        watch: bool,
        /// Seconds between connectivity checks in watch mode
        #[arg(long, default_value = "30")]
        interval: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the development remote store
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

impl Commands {
    /// Commands that should replay the queue before doing their own work.
    fn drains_on_start(&self) -> bool {
        !matches!(
            self,
            Commands::Queue { .. } | Commands::Status { .. } | Commands::Sync { .. }
        )
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "recipehub=debug,recipehub_core=debug"
    } else {
        "recipehub=warn,recipehub_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// The engine wired up for one command.
struct Session {
    hub: RecipeHub,
    remote: Arc<HttpRemote>,
}

impl Session {
    async fn open(config: &Config, args: &RemoteArgs, drain: bool) -> Result<Self> {
        let remote = Arc::new(HttpRemote::new(&args.remote, args.token.clone())?);
        let online = !args.offline && remote.is_reachable().await;
        info!(remote = %args.remote, online, "session opened");

        let hub = RecipeHub::new(
            LocalStore::open_or_unavailable(&config.db_path),
            remote.clone(),
            ConnectivityMonitor::new(online),
            &HubConfig::default()
                .with_owner(args.user.clone())
                .with_auto_sync(false),
        );

        if drain && online {
            match hub.sync_now().await {
                DrainOutcome::Finished(report) if !report.is_clean() => {
                    eprintln!(
                        "Note: sync finished with {} dropped and {} deferred change(s). See `recipehub queue`",
                        report.dropped.len(),
                        report.deferred
                    );
                }
                outcome => debug!(?outcome, "startup sync"),
            }
        }

        Ok(Self { hub, remote })
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => serve(&config, port, &bind, no_auth).await,
        command => {
            let session = Session::open(&config, &cli.remote, command.drains_on_start()).await?;
            dispatch(&session, command).await
        }
    }
}

async fn serve(config: &Config, port: u16, bind: &str, no_auth: bool) -> Result<()> {
    let api_key = if no_auth {
        None
    } else {
        let (key, new) = config.load_or_create_api_key()?;
        if new {
            eprintln!("Generated a new API key. Clients pass it with --token:");
            eprintln!("  {key}");
        }
        Some(key)
    };
    let rows = RowStore::open(&config.remote_db_path)
        .with_context(|| format!("Failed to open {}", config.remote_db_path.display()))?;
    server::start_server(rows, port, bind, api_key).await
}

async fn dispatch(session: &Session, command: Commands) -> Result<()> {
    let hub = &session.hub;

    match command {
        Commands::List {
            search,
            category,
            favorites,
            shared,
            json,
        } => {
            let filter = RecipeFilter {
                search,
                category_id: category,
                favorite: favorites.then_some(true),
                shared,
            };
            cmd_list(hub, &filter, json).await
        }
        Commands::Show { recipe, json } => cmd_show(hub, &recipe, json).await,
        Commands::Add {
            name,
            description,
            category,
            prep,
            cook,
            servings,
            ingredients,
            steps,
            json,
        } => {
            let fields = RecipeFields {
                name,
                description,
                category,
                prep,
                cook,
                servings,
                ingredients,
                steps,
            };
            cmd_add(hub, fields, json).await
        }
        Commands::Edit {
            recipe,
            name,
            description,
            clear_description,
            category,
            clear_category,
            prep,
            cook,
            servings,
            ingredients,
            steps,
            json,
        } => {
            let edit = RecipeEdit {
                name,
                description,
                clear_description,
                category,
                clear_category,
                prep,
                cook,
                servings,
                ingredients,
                steps,
            };
            cmd_edit(hub, &recipe, edit, json).await
        }
        Commands::Favorite { recipe, set, json } => cmd_favorite(hub, &recipe, set, json).await,
        Commands::Delete { recipe, json } => cmd_delete(hub, &recipe, json).await,
        Commands::Categories { json } => cmd_categories(hub, json).await,
        Commands::Queue { json } => cmd_queue(hub, json).await,
        Commands::Status { json } => cmd_status(hub, &session.remote, json).await,
        Commands::Sync {
            watch,
            interval,
            json,
        } => cmd_sync(hub, &session.remote, watch, interval, json).await,
        Commands::Serve { .. } => bail!("serve runs without a client session"),
    }
}
