//! tally-archive - run the monthly archive sweep
//!
//! Moves the previous month's events of every app out of the live store into
//! write-once archive records. Only does anything during the first days of a
//! month (see `[archive] grace_days`).

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use tally_core::{parse_timestamp, preview_archive_sweep, run_archive_sweep, storage, Config};

#[derive(Parser)]
#[command(name = "tally-archive")]
#[command(about = "Archive the previous month's events")]
#[command(version)]
struct Args {
    /// Pretend the sweep runs at this instant (RFC 3339)
    #[arg(long)]
    now: Option<String>,

    /// Show what would be archived without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Sweep even if the storage backend keeps events indefinitely
    #[arg(long)]
    force: bool,

    /// List existing archives for an app and exit
    #[arg(long, value_name = "APP")]
    list: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        tally_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let store = storage::open(&config.storage).context("failed to open storage")?;

    if let Some(app) = &args.list {
        let records = store
            .list_archives(app)
            .with_context(|| format!("failed to list archives for {}", app))?;
        if records.is_empty() {
            println!("No archives for {}", app);
        }
        for record in records {
            println!(
                "{}  users={} requests={} archived_at={}",
                record.month,
                record.unique_users.len(),
                record.total_requests,
                record.archived_at.to_rfc3339()
            );
        }
        return Ok(());
    }

    let now = match &args.now {
        Some(value) => parse_timestamp(value).context("invalid --now")?,
        None => Utc::now(),
    };
    let policy = config.archive.policy();

    tracing::info!(
        now = %now,
        backend = store.backend_name(),
        dry_run = args.dry_run,
        "tally-archive starting"
    );

    if !store.rolls_over() && !args.force {
        println!(
            "Storage backend '{}' keeps events indefinitely; nothing to archive \
             (use --force to archive anyway)",
            store.backend_name()
        );
        return Ok(());
    }

    if !policy.is_due(now) {
        println!(
            "Archive not due: day {} is past the {}-day grace window",
            now.format("%d"),
            policy.grace_days
        );
        return Ok(());
    }

    let month = policy.target_month(now);

    if args.dry_run {
        let outcome = preview_archive_sweep(store.as_ref(), now, &policy)
            .context("failed to preview archive sweep")?;
        if outcome.records.is_empty() && outcome.failures.is_empty() {
            println!("Nothing to archive for {}", month);
        }
        for (app_id, record) in &outcome.records {
            println!(
                "Would archive {} {}: {} requests, {} users",
                app_id,
                record.month,
                record.total_requests,
                record.unique_users.len()
            );
        }
        for failure in &outcome.failures {
            println!("Would fail {}: {}", failure.app_id, failure.error);
        }
        println!("\nDry run - nothing written");
        return Ok(());
    }

    let outcome =
        run_archive_sweep(store.as_ref(), now, &policy).context("archive sweep failed")?;

    if outcome.records.is_empty() && outcome.failures.is_empty() {
        println!("Nothing to archive for {}", month);
    }
    for (app_id, record) in &outcome.records {
        println!(
            "Archived {} {}: {} requests, {} users",
            app_id,
            record.month,
            record.total_requests,
            record.unique_users.len()
        );
    }
    for failure in &outcome.failures {
        eprintln!("Failed {}: {}", failure.app_id, failure.error);
    }

    if !outcome.failures.is_empty() {
        bail!(
            "{} app(s) could not be archived; their events remain live",
            outcome.failures.len()
        );
    }

    Ok(())
}
