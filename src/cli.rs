///
/// This module implements the CLI interface for vossibility: command parsing,
/// wiring of the GitHub client, sink and core pipeline, and user-visible output.
///
/// All business logic (event model, transforming store, live handling, sync job)
/// lives in the [`vossibility-core`] crate. This module is strictly CLI glue.
///
/// ## Commands
/// - `sync`: backfill the configured repositories from the GitHub issue history.
/// - `live`: consume queue messages (one JSON payload per line) for one repository.
///
/// [`vossibility-core`]: ../../vossibility-core/
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use vossibility_core::live::{Consumer, MessageHandler, PauseGate};
use vossibility_core::sink::MemorySink;
use vossibility_core::store::TransformingStore;
use vossibility_core::sync::{SyncJob, SyncOptions, SyncReport};
use vossibility_core::{BlobSink, Destination, Repository, StateFilter};

use crate::elastic::ElasticsearchSink;
use crate::github::GitHubClient;
use crate::load_config::{load_config, CliConfig};
use crate::queue;

/// CLI for vossibility: collect GitHub activity into a searchable store.
#[derive(Parser)]
#[clap(
    name = "vossibility",
    version,
    about = "Collect GitHub issues, pull requests, labels and comments into a searchable store"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync storage with the GitHub repositories
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Issue number to start from
        #[clap(long)]
        from: Option<u64>,
        /// Sleep delay in seconds between each GitHub page queried
        #[clap(long)]
        sleep: Option<u64>,
        /// Issue state filter: open, closed or all
        #[clap(long)]
        state: Option<StateFilter>,
        /// Destination: live or snapshot
        #[clap(long)]
        storage: Option<Destination>,
        /// Keep documents in memory instead of writing to the sink
        #[clap(long)]
        dry_run: bool,
    },
    /// Consume live events for one repository
    Live {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Repository (`user/repo`) the messages belong to; defaults to the only configured one
        #[clap(long)]
        repository: Option<String>,
        /// File of queue messages, one JSON payload per line; `-` for stdin
        #[clap(long, default_value = "-")]
        input: PathBuf,
        /// Pause live processing and resync the repository every N seconds (0 disables)
        #[clap(long, default_value_t = 0)]
        sync_interval: u64,
        /// Keep documents in memory instead of writing to the sink
        #[clap(long)]
        dry_run: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync {
            config,
            from,
            sleep,
            state,
            storage,
            dry_run,
        } => {
            let config = load_config(config)?;
            let defaults = config.sync.options();
            let options = SyncOptions {
                from: from.unwrap_or(defaults.from),
                sleep_per_page: sleep.map(Duration::from_secs).unwrap_or(defaults.sleep_per_page),
                state: state.unwrap_or(defaults.state),
                storage: storage.unwrap_or(defaults.storage),
                per_page: defaults.per_page,
            };
            tracing::info!(command = "sync", ?options, "Starting synchronisation");
            run_sync(&config, options, dry_run).await
        }
        Commands::Live {
            config,
            repository,
            input,
            sync_interval,
            dry_run,
        } => {
            let config = load_config(config)?;
            let repository = select_repository(&config, repository.as_deref())?;
            tracing::info!(command = "live", repository = %repository.full_name(), "Starting live consumer");
            run_live(&config, repository, input, sync_interval, dry_run).await
        }
    }
}

fn build_sink(config: &CliConfig, dry_run: bool) -> Result<Arc<dyn BlobSink>> {
    if dry_run {
        tracing::info!("Dry run: documents are kept in memory");
        return Ok(Arc::new(MemorySink::new()));
    }
    let sink = ElasticsearchSink::new(&config.sink)
        .map_err(|e| anyhow::anyhow!("Failed to construct sink: {e}"))?;
    Ok(Arc::new(sink))
}

fn build_client(config: &CliConfig) -> Result<Arc<GitHubClient>> {
    let client = GitHubClient::new(&config.github)
        .map_err(|e| anyhow::anyhow!("Failed to construct GitHub client: {e}"))?;
    Ok(Arc::new(client))
}

fn select_repository(config: &CliConfig, name: Option<&str>) -> Result<Repository> {
    match name {
        Some(name) => config
            .repository(name)
            .cloned()
            .with_context(|| format!("Repository {name} is not configured")),
        None => match config.repositories.as_slice() {
            [only] => Ok(only.clone()),
            _ => anyhow::bail!("Several repositories are configured, pick one with --repository"),
        },
    }
}

async fn run_sync(config: &CliConfig, options: SyncOptions, dry_run: bool) -> Result<()> {
    let client = build_client(config)?;
    let store = Arc::new(TransformingStore::new(
        build_sink(config, dry_run)?,
        config.transformations.clone(),
    ));

    let report = SyncJob::new(client, store, options)
        .run(&config.repositories)
        .await;
    print_report(&report);

    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Synchronisation failed for at least one repository, see report for restart cursors")
    }
}

fn print_report(report: &SyncReport) {
    println!("Synchronise complete.\nReport:");
    for repo in &report.repositories {
        match &repo.error {
            None => println!(
                "  {}: {} indexed, {} skipped, {} pages",
                repo.repository, repo.indexed, repo.skipped, repo.pages
            ),
            Some(e) => println!(
                "  {}: {} indexed, {} skipped, aborted ({}); restart with --from {}",
                repo.repository, repo.indexed, repo.skipped, e, repo.next_cursor
            ),
        }
    }
}

async fn run_live(
    config: &CliConfig,
    repository: Repository,
    input: PathBuf,
    sync_interval: u64,
    dry_run: bool,
) -> Result<()> {
    let client = build_client(config)?;
    let store = Arc::new(TransformingStore::new(
        build_sink(config, dry_run)?,
        config.transformations.clone(),
    ));
    let repository = Arc::new(repository);
    let pause_gate = PauseGate::new();

    let handler = Arc::new(MessageHandler::new(
        client.clone(),
        repository.clone(),
        store.clone(),
        pause_gate.clone(),
    ));
    let consumer = Consumer::new(handler, config.live.options());

    let reader = queue::open_input(&input)
        .await
        .with_context(|| format!("Failed to open input {}", input.display()))?;
    let (tx, rx) = mpsc::channel(config.live.max_in_flight.max(1) * 2);
    let feeder = tokio::spawn(queue::feed(reader, tx));

    let resync = async {
        if sync_interval == 0 {
            return futures::future::pending::<()>().await;
        }
        let job = SyncJob::new(client.clone(), store.clone(), config.sync.options());
        let repositories = [repository.as_ref().clone()];
        let mut ticks = tokio::time::interval(Duration::from_secs(sync_interval));
        loop {
            ticks.tick().await;
            let report = pause_gate.run_paused(job.run(&repositories)).await;
            print_report(&report);
        }
    };

    let report = tokio::select! {
        report = consumer.run(rx) => report,
        _ = resync => unreachable!("resync loop never returns"),
    };
    feeder
        .await
        .context("Queue input task failed")?
        .context("Failed to read queue input")?;

    println!(
        "Live consumer stopped: {} finished, {} failed, {} redelivered",
        report.finished, report.failed, report.requeued
    );
    if report.failed > 0 {
        anyhow::bail!("{} message(s) could not be processed", report.failed);
    }
    Ok(())
}
