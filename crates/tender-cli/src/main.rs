use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tender_storage::{SqliteTenderStore, TenderStore};
use tender_sync::{
    maybe_build_scheduler, RunOptions, ScrapeOrchestrator, ScrapeSummary, SyncConfig, SyncError,
};
use tender_web::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tender-cli")]
#[command(about = "Construction tender ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every enabled source once.
    Scrape {
        /// Fan sources out concurrently instead of one at a time.
        #[arg(long)]
        parallel: bool,
        /// Only run these source ids (repeatable).
        #[arg(long = "source", value_name = "ID")]
        sources: Vec<String>,
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Initial scrape, cron scheduler, and the query API.
    Serve,
    /// Print stored tender counts.
    Stats,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = std::env::var("TENDER_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_summary(summary: &ScrapeSummary) {
    for result in &summary.results {
        if result.success {
            println!(
                "  ok   {:<24} fetched={} persisted={} open={} awarded={} malformed={}",
                result.source_id,
                result.stats.fetched,
                result.stats.persisted,
                result.stats.open,
                result.stats.awarded,
                result.stats.skipped_malformed,
            );
        } else {
            println!(
                "  FAIL {:<24} {}",
                result.source_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!(
        "scrape complete: run_id={} sources={} failed={} persisted={} open={} awarded={} duration_ms={}",
        summary.run_id,
        summary.totals.attempted,
        summary.totals.failed,
        summary.totals.persisted,
        summary.totals.open,
        summary.totals.awarded,
        summary.duration_ms,
    );
}

async fn scrape(
    orchestrator: &ScrapeOrchestrator,
    options: RunOptions,
    json: bool,
) -> Result<ExitCode> {
    let summary = orchestrator.run(options).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(if summary.any_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn serve(config: &SyncConfig, orchestrator: Arc<ScrapeOrchestrator>) -> Result<()> {
    let initial = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        match initial.run(RunOptions::default()).await {
            Ok(summary) => info!(
                run_id = %summary.run_id,
                failed = summary.totals.failed,
                persisted = summary.totals.persisted,
                "initial scrape finished"
            ),
            Err(SyncError::RunInProgress) => warn!("initial scrape skipped; a run is in progress"),
            Err(err) => error!(error = %err, "initial scrape failed to start"),
        }
    });

    let mut scheduler = maybe_build_scheduler(config, Arc::clone(&orchestrator)).await?;
    if let Some(sched) = scheduler.as_mut() {
        sched.start().await.context("starting scheduler")?;
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.web_port));
    let served = tender_web::serve(AppState::new(orchestrator), addr, wait_for_shutdown_signal()).await;

    if let Some(mut sched) = scheduler {
        if let Err(err) = sched.shutdown().await {
            warn!(error = %err, "scheduler shutdown failed");
        }
    }
    served
}

async fn stats(store: &dyn TenderStore) -> Result<()> {
    let total = store.count().await?;
    let open = store.count_open().await?;
    println!("tenders: total={total} open={open} awarded={}", total.saturating_sub(open));
    for row in store.category_counts().await? {
        println!("  {:<28} {}", row.category, row.count);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    let store = Arc::new(
        SqliteTenderStore::connect(&config.database_url)
            .await
            .with_context(|| format!("opening tender store at {}", config.database_url))?,
    );

    let outcome = match cli.command.unwrap_or(Commands::Scrape {
        parallel: false,
        sources: Vec::new(),
        json: false,
    }) {
        Commands::Scrape {
            parallel,
            sources,
            json,
        } => {
            let orchestrator = ScrapeOrchestrator::from_config(config, store.clone())?;
            let options = RunOptions {
                parallel,
                only_sources: sources,
            };
            scrape(&orchestrator, options, json).await
        }
        Commands::Serve => {
            let orchestrator = Arc::new(ScrapeOrchestrator::from_config(config.clone(), store.clone())?);
            serve(&config, orchestrator).await.map(|()| ExitCode::SUCCESS)
        }
        Commands::Stats => stats(store.as_ref()).await.map(|()| ExitCode::SUCCESS),
    };

    store.close().await;
    outcome
}
