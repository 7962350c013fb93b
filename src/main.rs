//! CLI entry point for tape-fetcher.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tape_fetcher_core::{
    Candidate, ConfigError, Database, EventSink, Ledger, Orchestrator, RunConfig, SearchOutcome,
    connect_cache,
};
use tracing::{debug, info};

mod cli;
mod exit;
mod progress;

use cli::{
    Args, ClearHistoryArgs, Command, DestArgs, DownloadArgs, FetchArgs, HistoryArgs, SearchArgs,
};
use exit::{ProcessExit, determine_exit_outcome};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let outcome = match &args.command {
        Command::Search(search) => run_search(&args, search).await?,
        Command::Fetch(fetch) => run_fetch(&args, fetch).await?,
        Command::Download(download) => run_download(&args, download).await?,
        Command::History(history) => run_history(&args, history).await?,
        Command::Reconcile(location) => run_reconcile(&args, location).await?,
        Command::ClearHistory(clear) => run_clear_history(&args, clear).await?,
    };
    Ok(outcome.into())
}

/// Opens the ledger at the configured location, or in memory when none is
/// given and `allow_memory` is set.
async fn open_ledger(
    database: Option<PathBuf>,
    dest: Option<&Path>,
    cache_url: Option<&str>,
    allow_memory: bool,
) -> Result<Arc<Ledger>> {
    let location = RunConfig {
        database_path: database,
        dest_root: dest.map(Path::to_path_buf),
        ..RunConfig::default()
    }
    .database_location();

    let db = match location {
        Ok(path) => {
            debug!(path = %path.display(), "opening history database");
            Database::new(&path)
                .await
                .with_context(|| format!("failed to open history database {}", path.display()))?
        }
        Err(ConfigError::NoDatabase) if allow_memory => {
            debug!("no history database location; using in-memory history");
            Database::new_in_memory().await?
        }
        Err(error) => return Err(error.into()),
    };

    let cache = match cache_url {
        Some(url) => connect_cache(url).await,
        None => None,
    };
    Ok(Arc::new(Ledger::open(db, cache).await?))
}

/// Runs `config` with a progress UI and Ctrl-C cancellation.
async fn run_pipeline(
    args: &Args,
    config: &RunConfig,
    show_spinner: bool,
) -> Result<SearchOutcome> {
    let ledger = open_ledger(
        config.database_path.clone(),
        config.dest_root.as_deref(),
        config.cache_url.as_deref(),
        !config.download,
    )
    .await?;

    let (events, receiver) = EventSink::channel();
    let ui = progress::spawn_progress_ui(
        show_spinner && !args.quiet && io::stderr().is_terminal(),
        receiver,
    );

    let orchestrator = Arc::new(Orchestrator::new(ledger, events)?);
    let cancel_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted; finishing current work");
                orchestrator.cancel();
            }
        })
    };

    let result = orchestrator.search(config).await;
    cancel_handle.abort();
    drop(orchestrator);
    let _ = ui.await;
    Ok(result?)
}

async fn run_search(args: &Args, search: &SearchArgs) -> Result<ProcessExit> {
    let mut config = search
        .scan
        .to_config(args.database.clone(), args.cache_url.clone());
    config.dest_root.clone_from(&search.dest);

    let outcome = run_pipeline(args, &config, !search.json).await?;

    if search.json {
        println!("{}", serde_json::to_string_pretty(&outcome.candidates)?);
    } else {
        for candidate in &outcome.candidates {
            println!("{}\t{}", candidate.size_bytes, candidate.url);
        }
    }

    let totals = &outcome.totals;
    info!(
        galleries = totals.galleries,
        gallery_errors = totals.gallery_errors,
        valid = totals.valid,
        discarded = totals.discarded,
        page_errors = totals.page_errors,
        megabytes = totals.total_megabytes,
        "Search complete"
    );

    let succeeded = totals.galleries.saturating_sub(totals.gallery_errors);
    Ok(determine_exit_outcome(succeeded, totals.gallery_errors))
}

async fn run_fetch(args: &Args, fetch: &FetchArgs) -> Result<ProcessExit> {
    let config = fetch.to_config(args.database.clone(), args.cache_url.clone());
    let outcome = run_pipeline(args, &config, true).await?;

    let totals = &outcome.totals;
    info!(
        galleries = totals.galleries,
        gallery_errors = totals.gallery_errors,
        valid = totals.valid,
        page_errors = totals.page_errors,
        downloaded = totals.downloaded,
        skipped = totals.skipped,
        failed = totals.download_errors,
        ledger_errors = totals.ledger_errors,
        cancelled = totals.cancelled,
        "Fetch complete"
    );

    let failed = totals.download_errors + totals.gallery_errors;
    Ok(determine_exit_outcome(totals.downloaded + totals.skipped, failed))
}

async fn run_download(args: &Args, download: &DownloadArgs) -> Result<ProcessExit> {
    let raw = read_candidates_input(&download.candidates)?;
    let candidates: Vec<Candidate> =
        serde_json::from_str(&raw).context("candidate file is not a `search --json` list")?;
    if candidates.is_empty() {
        info!("No candidates to download");
        return Ok(ProcessExit::Success);
    }

    let options = download.download_options();
    let ledger = open_ledger(
        args.database.clone(),
        Some(&options.dest_root),
        args.cache_url.as_deref(),
        false,
    )
    .await?;

    let (events, receiver) = EventSink::channel();
    let ui = progress::spawn_progress_ui(!args.quiet && io::stderr().is_terminal(), receiver);
    let orchestrator = Orchestrator::new(ledger, events)?;
    let result = orchestrator.download(&candidates, &options).await;
    drop(orchestrator);
    let _ = ui.await;
    let stats = result?;

    info!(
        downloaded = stats.downloaded,
        skipped = stats.skipped,
        failed = stats.errors,
        ledger_errors = stats.ledger_errors,
        megabytes = stats.megabytes(),
        "Download complete"
    );
    Ok(determine_exit_outcome(
        stats.downloaded + stats.skipped,
        stats.errors,
    ))
}

fn read_candidates_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read candidate file {}", path.display()))
}

async fn run_history(args: &Args, history: &HistoryArgs) -> Result<ProcessExit> {
    let ledger = open_ledger(
        args.database.clone(),
        history.location.dest.as_deref(),
        args.cache_url.as_deref(),
        false,
    )
    .await?;

    if history.galleries {
        let galleries = ledger.galleries().await?;
        if history.json {
            println!("{}", serde_json::to_string_pretty(&galleries)?);
        } else {
            for gallery in galleries {
                println!("{gallery}");
            }
        }
        return Ok(ProcessExit::Success);
    }

    let entries = ledger.entries().await?;
    if history.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!(
                "{}\t{}\t{}\t{}\t{}",
                entry.downloaded_at, entry.status, entry.owner, entry.filename, entry.source_url
            );
        }
    }
    info!(entries = entries.len(), "History listed");
    Ok(ProcessExit::Success)
}

async fn run_reconcile(args: &Args, location: &DestArgs) -> Result<ProcessExit> {
    let ledger = open_ledger(
        args.database.clone(),
        location.dest.as_deref(),
        args.cache_url.as_deref(),
        false,
    )
    .await?;
    let report = ledger.reconcile().await?;
    println!(
        "Checked {} entries, marked {} deleted",
        report.checked, report.marked_deleted
    );
    Ok(ProcessExit::Success)
}

async fn run_clear_history(args: &Args, clear: &ClearHistoryArgs) -> Result<ProcessExit> {
    if !clear.yes {
        bail!("refusing to clear history without confirmation\n  Suggestion: Re-run with --yes");
    }
    let ledger = open_ledger(
        args.database.clone(),
        clear.location.dest.as_deref(),
        args.cache_url.as_deref(),
        false,
    )
    .await?;
    let removed = ledger.clear().await?;
    println!("Removed {removed} history entries");
    Ok(ProcessExit::Success)
}
