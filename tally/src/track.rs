//! tally-track - record a usage event
//!
//! Appends one event to the local store, running the monthly archive sweep
//! first when the storage backend rolls over. With `--remote` the event is
//! sent to the configured collection endpoint instead.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Store: $XDG_DATA_HOME/tally/ (~/.local/share/tally/)
//! - Logs: $XDG_STATE_HOME/tally/tally.log (~/.local/state/tally/tally.log)
//! - Config: $XDG_CONFIG_HOME/tally/config.toml (~/.config/tally/config.toml)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::BTreeMap;
use tally_core::client::BlockingAnalyticsClient;
use tally_core::{record_event, storage, Config, TrackRequest};

#[derive(Parser)]
#[command(name = "tally-track")]
#[command(about = "Record a usage event for an app")]
#[command(version)]
struct Args {
    /// App id (e.g. geogame)
    #[arg(long)]
    app: String,

    /// User id
    #[arg(long)]
    user: String,

    /// Endpoint or screen the user hit
    #[arg(long)]
    endpoint: Option<String>,

    /// Extra metadata as key=value (repeatable)
    #[arg(long = "meta", value_parser = parse_key_value)]
    meta: Vec<(String, String)>,

    /// Send to the configured remote endpoint instead of the local store
    #[arg(long)]
    remote: bool,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        tally_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(app = %args.app, remote = args.remote, "tally-track starting");

    let metadata: Option<BTreeMap<String, String>> = if args.meta.is_empty() {
        None
    } else {
        Some(args.meta.into_iter().collect())
    };

    if args.remote {
        let mut client_config = config.client.clone();
        client_config.app_id = Some(args.app.clone());

        let client = BlockingAnalyticsClient::new(&client_config)
            .context("failed to create analytics client")?;
        let response = client
            .track(&args.user, args.endpoint.as_deref(), metadata.as_ref())
            .context("failed to send event")?;

        println!(
            "Sent event for {} to {} (success: {})",
            args.app,
            client_config.api_url.as_deref().unwrap_or(""),
            response.success
        );
        return Ok(());
    }

    let store = storage::open(&config.storage).context("failed to open storage")?;

    let request = TrackRequest {
        app_id: args.app,
        user_id: args.user,
        endpoint: args.endpoint,
        metadata,
    };

    let receipt = record_event(
        store.as_ref(),
        request,
        Utc::now(),
        &config.archive.policy(),
    )
    .context("failed to record event")?;

    for month in &receipt.archived {
        println!("Archived {}", month);
    }
    println!("Recorded event for {} at {}", receipt.app_id, receipt.recorded_at);

    Ok(())
}
