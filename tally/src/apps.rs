//! tally-apps - manage the app registry

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tally_core::{storage, App, Config};

#[derive(Parser)]
#[command(name = "tally-apps")]
#[command(about = "List and register tracked apps")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered apps
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Register a new app
    Add {
        /// Display name; the id is derived from it
        #[arg(long)]
        name: String,

        /// Short description
        #[arg(long)]
        description: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        tally_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let store = storage::open(&config.storage).context("failed to open storage")?;

    match args.command {
        Command::List { json } => {
            let apps = store.list_apps().context("failed to list apps")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&apps)?);
            } else if apps.is_empty() {
                println!("No apps registered.");
            } else {
                println!("{:<20} {:<24} {:<10} CREATED", "ID", "NAME", "STATUS");
                for app in &apps {
                    println!(
                        "{:<20} {:<24} {:<10} {}",
                        app.id,
                        app.name,
                        app.status.as_str(),
                        app.created_at
                    );
                }
            }
        }
        Command::Add { name, description } => {
            let app = App::new(&name, description.as_deref(), Utc::now().date_naive())
                .context("invalid app")?;
            store.register_app(&app).context("failed to register app")?;
            tracing::info!(app_id = %app.id, "Registered app");
            println!("Registered {} ({})", app.id, app.name);
        }
    }

    Ok(())
}
