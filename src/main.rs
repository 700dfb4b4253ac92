//! CLI entry point for ripper.

use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ripper_core::{
    Config, ItemStatus, Ledger, Orchestrator, ParsedUrl, Provider, Reference, RunSummary,
    extract_urls,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

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

    let mut config = Config::load_or_default(args.config.as_deref())
        .context("could not load configuration")?;
    if let Some(folder) = &args.folder {
        config.downloads.folder.clone_from(folder);
    }
    if let Some(max_retries) = args.max_retries {
        config.downloads.max_retries = max_retries;
    }

    let ledger = if args.no_db {
        debug!("ledger disabled by --no-db");
        Ledger::disabled()
    } else {
        Ledger::open(&config.database)
            .await
            .context("could not open the download ledger")?
    };
    let ledger = Arc::new(ledger);

    let quiet = args.quiet;
    let orchestrator = Orchestrator::from_config(config, Arc::clone(&ledger));

    let code = match args.command {
        Command::Url { urls } => {
            let input = read_input(&urls)?;
            let references = collect_references(&orchestrator, &input).await;
            if references.is_empty() {
                info!("No supported URLs found in input");
                ExitCode::SUCCESS
            } else {
                run(&orchestrator, references, quiet).await
            }
        }
        Command::Id {
            provider,
            media_type,
            id,
        } => {
            run(
                &orchestrator,
                vec![Reference::new(provider, media_type, id)],
                quiet,
            )
            .await
        }
        Command::Search {
            provider,
            media_type,
            query,
            limit,
        } => {
            let results = orchestrator
                .search(provider, media_type, &query, limit)
                .await
                .with_context(|| format!("{provider} search failed"))?;
            for page in results {
                println!("{}", serde_json::to_string_pretty(&page)?);
            }
            ExitCode::SUCCESS
        }
        Command::Failed => {
            let failures = ledger
                .failures()
                .await
                .context("could not read the failed-downloads ledger")?;
            if failures.is_empty() {
                info!("No failed downloads recorded");
            }
            for record in failures {
                println!(
                    "{}:{}:{}\t{}\t{}",
                    record.source,
                    record.media_type,
                    record.id,
                    record.recorded_at,
                    record.reason.as_deref().unwrap_or("-")
                );
            }
            ExitCode::SUCCESS
        }
    };

    drop(orchestrator);
    if let Ok(ledger) = Arc::try_unwrap(ledger) {
        ledger.close().await;
    }
    Ok(code)
}

/// Positional URLs, or stdin when none were given and stdin is piped.
fn read_input(urls: &[String]) -> Result<String> {
    if !urls.is_empty() {
        return Ok(urls.join("\n"));
    }
    if io::stdin().is_terminal() {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: echo 'https://www.qobuz.com/us-en/album/x/0060254728697' | ripper url");
        return Ok(String::new());
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("could not read stdin")?;
    Ok(buffer)
}

async fn collect_references(orchestrator: &Orchestrator, input: &str) -> Vec<Reference> {
    let mut references = Vec::new();
    for parsed in extract_urls(input) {
        match parsed {
            Ok(ParsedUrl::Reference(reference)) => references.push(reference),
            Ok(ParsedUrl::SoundcloudPermalink(url)) => {
                match orchestrator.resolve_url(Provider::Soundcloud, &url).await {
                    Ok(reference) => references.push(reference),
                    Err(e) => warn!(url = %url, error = %e, "could not resolve permalink"),
                }
            }
            Err(e) => warn!(error = %e, "Skipped unrecognized input"),
        }
    }
    info!(count = references.len(), "Parsed input");
    references
}

async fn run(orchestrator: &Orchestrator, references: Vec<Reference>, quiet: bool) -> ExitCode {
    let spinner = if quiet || !io::stderr().is_terminal() {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
            spinner.set_style(style);
        }
        spinner.set_message(format!("ripping {} item(s)", references.len()));
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    };

    let summary = orchestrator.submit(references).await;
    spinner.finish_and_clear();

    report(&summary, quiet);
    if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn report(summary: &RunSummary, quiet: bool) {
    for outcome in summary.outcomes() {
        let reference = outcome.reference();
        match &outcome.status {
            ItemStatus::Succeeded { path } if !quiet => {
                println!("done     {reference}  {}", path.display());
            }
            ItemStatus::Skipped(reason) if !quiet => println!("skipped  {reference}  {reason}"),
            ItemStatus::Failed { reason, message } => {
                eprintln!("failed   {reference}  {reason}: {message}");
            }
            _ => {}
        }
    }
    if !quiet {
        println!("{summary}");
    }
}
