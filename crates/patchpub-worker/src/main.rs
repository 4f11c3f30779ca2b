//! Patchpub - patch publication batch exporter

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use patchpub_common::logging::{init_logging, LogConfig, LogLevel};
use patchpub_worker::db::ConnectionSupervisor;
use patchpub_worker::pipeline::{inspect, ItemOutcome, OutputLayout, RecordProcessor};
use patchpub_worker::queue::{format_queue_line, seeded_publication_id, WorkItem, WorkQueue};
use patchpub_worker::retry::{RetryExecutor, RetryOutcome};
use patchpub_worker::sinks::{CatalogSink, DescriptorSink};
use patchpub_worker::source::PatchSession;
use patchpub_worker::upload::ArchiveUploader;
use patchpub_worker::{BatchRunner, Config};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "patchpub")]
#[command(author, version, about = "Patch publication batch exporter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process queued identifiers (one batch unless --all)
    Run {
        /// Keep taking batches until the queue is empty
        #[arg(long)]
        all: bool,

        /// Items per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Queue file to read from
        #[arg(short, long)]
        queue: Option<PathBuf>,
    },

    /// Publish a single identifier without touching the queue
    Process {
        identifier: String,
        publication_id: String,
    },

    /// Show the metadata the pipeline would use, without writing anything
    Inspect { identifier: String },

    /// Rebuild the queue file from every identifier in the catalog
    SeedQueue {
        /// Output file (defaults to the configured queue file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("patchpub")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = Config::load()?;

    let supervisor = ConnectionSupervisor::init(config.database.clone())
        .await
        .context("Failed to initialize database pool")?;

    let result = execute(cli.command, &mut config, &supervisor).await;
    if let Err(e) = &result {
        error!(error = %e, "Run failed");
    }

    supervisor.shutdown().await;
    result
}

async fn execute(
    command: Option<Command>,
    config: &mut Config,
    supervisor: &ConnectionSupervisor,
) -> Result<()> {
    match resolve_command(command, config) {
        Command::Run {
            all,
            batch_size,
            queue,
        } => {
            if all {
                config.queue.one_batch_only = false;
            }
            if let Some(size) = batch_size {
                config.queue.batch_size = size;
            }
            if let Some(path) = queue {
                config.queue.checkpoint_path = path;
            }
            config.validate()?;

            let summary = build_runner(config).run(supervisor).await?;
            if summary.aborted {
                anyhow::bail!("Batch aborted by a fatal fault");
            }
        },
        Command::Process {
            identifier,
            publication_id,
        } => {
            let item = WorkItem {
                identifier,
                publication_id,
            };
            match build_runner(config).process_one(supervisor, &item).await {
                ItemOutcome::Success(published) => info!(
                    identifier = %published.identifier,
                    archive = %published.archive.path.display(),
                    md5 = %published.archive.md5,
                    "Item published"
                ),
                ItemOutcome::ItemFailure(reason) => {
                    warn!(identifier = %item.identifier, reason = %reason, "Item not published")
                },
                ItemOutcome::FatalAbort(err) => return Err(err.into()),
            }
        },
        Command::Inspect { identifier } => {
            let executor = RetryExecutor::new(supervisor, config.retry);
            match executor
                .run(&identifier, |session| inspect(session, &identifier))
                .await
            {
                RetryOutcome::Done { value, .. } => {
                    if value.metadata.is_empty() {
                        warn!(identifier = %identifier, "No metadata found");
                    }
                    info!(report = %serde_json::to_string_pretty(&value)?, "Inspection");
                },
                RetryOutcome::RetriesExhausted { error, .. } | RetryOutcome::Fatal { error, .. } => {
                    return Err(error.into())
                },
            }
        },
        Command::SeedQueue { output } => {
            let path = output.unwrap_or_else(|| config.queue.checkpoint_path.clone());
            seed_queue(supervisor, config, path).await?;
        },
    }

    Ok(())
}

/// A bare invocation processes exactly one batch, whatever the configuration says.
fn resolve_command(command: Option<Command>, config: &mut Config) -> Command {
    match command {
        Some(command) => command,
        None => {
            config.queue.one_batch_only = true;
            Command::Run {
                all: false,
                batch_size: None,
                queue: None,
            }
        },
    }
}

fn build_runner(config: &Config) -> BatchRunner {
    let queue = WorkQueue::new(&config.queue.checkpoint_path, &config.queue.ledger_path);
    let processor = RecordProcessor::new(
        OutputLayout::new(&config.output.base_dir, &config.output.patch_folder),
        CatalogSink::new(&config.output.catalog_path),
        DescriptorSink::new(&config.output.descriptor_path, config.descriptor.clone()),
        ArchiveUploader::new(config.upload.clone()),
    );
    BatchRunner::new(queue, processor, config.runner_settings())
}

async fn seed_queue(supervisor: &ConnectionSupervisor, config: &Config, path: PathBuf) -> Result<()> {
    let executor = RetryExecutor::new(supervisor, config.retry);
    let seeds = match executor
        .run("seed-queue", |session| async move { session.list_queue_seeds().await })
        .await
    {
        RetryOutcome::Done { value, .. } => value,
        RetryOutcome::RetriesExhausted { error, .. } | RetryOutcome::Fatal { error, .. } => {
            return Err(error.into())
        },
    };

    let total = seeds.len();
    let lines: Vec<String> = seeds
        .iter()
        .enumerate()
        .map(|(idx, seed)| {
            format_queue_line(&seed.identifier, &seeded_publication_id(total - idx), &seed.latest_date)
        })
        .collect();

    let queue = WorkQueue::new(&path, &config.queue.ledger_path);
    queue
        .seed(&lines)
        .await
        .with_context(|| format!("Failed to write queue file {}", path.display()))?;

    info!(path = %path.display(), identifiers = total, "Queue seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_config() -> Config {
        let mut config = Config::default();
        config.queue.one_batch_only = false;
        config
    }

    #[test]
    fn test_bare_invocation_runs_one_batch() {
        let mut config = drain_config();

        let command = resolve_command(None, &mut config);

        assert!(matches!(command, Command::Run { all: false, batch_size: None, queue: None }));
        assert!(config.queue.one_batch_only);
        assert!(config.runner_settings().one_batch_only);
    }

    #[test]
    fn test_explicit_run_keeps_configured_mode() {
        let mut config = drain_config();

        let cli = Cli::parse_from(["patchpub", "run", "--batch-size", "7"]);
        let command = resolve_command(cli.command, &mut config);

        assert!(matches!(command, Command::Run { all: false, batch_size: Some(7), .. }));
        assert!(!config.queue.one_batch_only);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["patchpub", "-v", "process", "CM10", "MPLMM0000001"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Some(Command::Process { ref identifier, ref publication_id })
                if identifier == "CM10" && publication_id == "MPLMM0000001"
        ));

        let cli = Cli::parse_from(["patchpub"]);
        assert!(cli.command.is_none());
    }
}
