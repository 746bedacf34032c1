use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use clist_adapters::{document_source, DocumentFormat, DomainFlagClassifier, EntryParser};
use clist_core::CauseEntry;
use clist_storage::{CauseStore, PgCauseStore};
use clist_sync::{controller_from_config, ingest_status, maybe_build_scheduler, SyncConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "clist-cli")]
#[command(about = "Court cause list ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest one date, or every date the source lists.
    Sync {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Apply database migrations.
    Migrate,
    /// Print the latest run summary and stored record count as JSON.
    Status,
    /// Print the most recent run logs as JSON.
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Parse a local document and print its entries as JSON.
    Parse {
        path: PathBuf,
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long, default_value = "pdf")]
        format: DocumentFormat,
    },
    /// Run scheduled ingestion until interrupted.
    Schedule,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { date: None }) {
        Commands::Sync { date } => {
            let controller = Arc::new(controller_from_config(&config).await?);
            let watcher = {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() && controller.stop() {
                        warn!("stop requested; finishing the current date");
                    }
                })
            };
            let outcome = controller.trigger(date).await;
            watcher.abort();
            println!("{}", serde_json::to_string_pretty(&outcome?)?);
        }
        Commands::Migrate => {
            let store = PgCauseStore::connect(&config.database_url)
                .await
                .context("connecting to cause store")?;
            store.migrate().await.context("running migrations")?;
            info!("migrations applied");
        }
        Commands::Status => {
            let store = PgCauseStore::connect(&config.database_url)
                .await
                .context("connecting to cause store")?;
            let status = ingest_status(&store).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Logs { limit } => {
            let store = PgCauseStore::connect(&config.database_url)
                .await
                .context("connecting to cause store")?;
            let logs = store.recent_logs(limit).await?;
            println!("{}", serde_json::to_string_pretty(&logs)?);
        }
        Commands::Parse { path, date, format } => {
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let classifier = match &config.keywords_file {
                Some(keywords) => DomainFlagClassifier::from_yaml_file(keywords)?,
                None => DomainFlagClassifier::default(),
            };
            let entries = parse_document(&bytes, date, format, &classifier)?;
            info!(entries = entries.len(), path = %path.display(), "parsed document");
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Schedule => {
            let config = SyncConfig {
                scheduler_enabled: true,
                ..config
            };
            let controller = Arc::new(controller_from_config(&config).await?);
            let Some(mut sched) = maybe_build_scheduler(&config, Arc::clone(&controller)).await?
            else {
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            controller.stop();
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

fn parse_document(
    bytes: &[u8],
    date: NaiveDate,
    format: DocumentFormat,
    classifier: &DomainFlagClassifier,
) -> Result<Vec<CauseEntry>> {
    let lines = document_source(format).lines(bytes)?;
    let mut entries = EntryParser::new(date).parse(&lines);
    classifier.apply(&mut entries);
    Ok(entries)
}
