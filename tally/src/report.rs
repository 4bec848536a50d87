//! tally-report - show usage for an app
//!
//! Prints unique users, total requests and the daily, weekly or monthly
//! series for an app's live events, from the local store or (with
//! `--remote`) from the configured collection endpoint.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use tally_core::client::BlockingAnalyticsClient;
use tally_core::{storage, AnalyticsReport, Config, DateRange, Granularity};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "tally-report")]
#[command(about = "Show usage analytics for an app")]
#[command(version)]
struct Args {
    /// App id (e.g. geogame)
    #[arg(long)]
    app: String,

    /// Series granularity: daily, weekly or monthly
    #[arg(long, default_value = "daily")]
    range: Granularity,

    /// First day to include (YYYY-MM-DD, UTC)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD, UTC)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Query the configured remote endpoint instead of the local store
    #[arg(long)]
    remote: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        tally_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let range = DateRange::new(args.from, args.to).context("invalid date range")?;

    let (report, source) = if args.remote {
        if !range.is_unbounded() {
            bail!("--from/--to are not supported with --remote");
        }

        let mut client_config = config.client.clone();
        client_config.app_id = Some(args.app.clone());
        let client = BlockingAnalyticsClient::new(&client_config)
            .context("failed to create analytics client")?;
        let report = client
            .get_stats(args.range)
            .context("failed to fetch remote stats")?;
        (report, "remote")
    } else {
        let store = storage::open(&config.storage).context("failed to open storage")?;
        let report = store
            .query_series(&args.app, args.range, &range)
            .with_context(|| format!("failed to build report for {}", args.app))?;
        (report, store.backend_name())
    };

    tracing::debug!(
        app = %args.app,
        granularity = %args.range,
        source,
        points = report.series.points().len(),
        "Built report"
    );

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_text(&args.app, source, &report),
    }

    Ok(())
}

fn print_text(app: &str, source: &str, report: &AnalyticsReport) {
    println!("{} ({}, {})", app, report.series.granularity(), source);
    println!("Unique users:   {}", report.unique_users);
    println!("Total requests: {}", report.total_requests);

    let points = report.series.points();
    if points.is_empty() {
        println!();
        println!("No events.");
        return;
    }

    println!();
    println!("{:<12} {:>8} {:>10}", "DATE", "USERS", "REQUESTS");
    for point in points {
        println!("{:<12} {:>8} {:>10}", point.date, point.users, point.requests);
    }
}
