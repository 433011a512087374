//! fhirlink CLI - Command line interface for peer-to-peer resource replication.
//!
//! This tool drives the replication core over JSON store snapshots: resolving
//! the sync catalog, counting pending records, producing and applying single
//! batches, and running a full transfer between two snapshots.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fhirlink_store::MemoryStore;
use fhirlink_sync::{
    create_default_registry, BatchWindow, Checkpoint, CheckpointStore, FileCheckpointStore,
    Session, SyncConfig, TransferDriver, WireBatch,
};

/// Checkpoint file that is only written once the receiving snapshot on disk
/// holds everything the checkpoint covers.
struct SnapshotCheckpointStore {
    store: Arc<MemoryStore>,
    snapshot: PathBuf,
    checkpoints: FileCheckpointStore,
}

#[async_trait]
impl CheckpointStore for SnapshotCheckpointStore {
    async fn load(&self) -> fhirlink_common::Result<Checkpoint> {
        self.checkpoints.load().await
    }

    async fn save(&self, checkpoint: &Checkpoint) -> fhirlink_common::Result<()> {
        self.store.save_snapshot(&self.snapshot).await?;
        self.checkpoints.save(checkpoint).await
    }
}

#[derive(Parser)]
#[command(name = "fhirlink")]
#[command(about = "fhirlink - Peer-to-peer FHIR resource replication")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Sync configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved sync catalog.
    Catalog,

    /// Count resources left to transfer.
    Count {
        /// Store snapshot to count in.
        #[arg(short, long)]
        store: PathBuf,

        /// Checkpoint file (default: count everything).
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Produce one outbound batch.
    Produce {
        /// Store snapshot to read from.
        #[arg(short, long)]
        store: PathBuf,

        /// Resource type to read.
        #[arg(short = 't', long)]
        resource_type: String,

        /// Checkpoint in epoch milliseconds.
        #[arg(long, default_value_t = 0)]
        since: i64,

        /// Resources to skip from the checkpoint.
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Batch size (default: from configuration).
        #[arg(long)]
        size: Option<usize>,

        /// Write the batch here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply one inbound batch.
    Apply {
        /// Store snapshot to write to. Created if missing.
        #[arg(short, long)]
        store: PathBuf,

        /// Resource type of the batch.
        #[arg(short = 't', long)]
        resource_type: String,

        /// Batch file produced by `produce`.
        #[arg(short, long)]
        batch: PathBuf,

        /// Checkpoint before this batch, in epoch milliseconds.
        #[arg(long, default_value_t = 0)]
        prior: i64,
    },

    /// Transfer everything newer than the checkpoint from one snapshot to another.
    Transfer {
        /// Sending store snapshot.
        #[arg(long)]
        from: PathBuf,

        /// Receiving store snapshot. Created if missing.
        #[arg(long)]
        to: PathBuf,

        /// Checkpoint file, updated after every applied batch.
        #[arg(long)]
        checkpoint: PathBuf,

        /// Override the configured batch size.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Catalog => cmd_catalog(config).await,

        Commands::Count { store, checkpoint } => {
            cmd_count(config, &store, checkpoint.as_deref()).await
        }

        Commands::Produce {
            store,
            resource_type,
            since,
            offset,
            size,
            output,
        } => {
            cmd_produce(
                config,
                &store,
                &resource_type,
                since,
                offset,
                size,
                output.as_deref(),
            )
            .await
        }

        Commands::Apply {
            store,
            resource_type,
            batch,
            prior,
        } => cmd_apply(config, &store, &resource_type, &batch, prior).await,

        Commands::Transfer {
            from,
            to,
            checkpoint,
            batch_size,
        } => {
            let config = match batch_size {
                Some(size) => config.with_batch_size(size),
                None => config,
            };
            cmd_transfer(config, &from, &to, &checkpoint).await
        }
    }
}

/// Load the configuration file, or the defaults.
async fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

/// Open a session over a snapshot file.
async fn open_session(config: SyncConfig, path: &Path) -> Result<(Arc<MemoryStore>, Session)> {
    let store = Arc::new(
        MemoryStore::load_snapshot(path)
            .await
            .with_context(|| format!("Failed to load store snapshot {}", path.display()))?,
    );
    let session = Session::new(config, store.clone(), Arc::new(create_default_registry()))
        .context("Failed to open sync session")?;
    Ok((store, session))
}

/// Print the resolved catalog.
async fn cmd_catalog(config: SyncConfig) -> Result<()> {
    let session = Session::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(create_default_registry()),
    )
    .context("Failed to resolve catalog")?;

    println!("{}", serde_json::to_string_pretty(&session.descriptors())?);
    Ok(())
}

/// Print the progress envelope for a snapshot.
async fn cmd_count(config: SyncConfig, store: &Path, checkpoint: Option<&Path>) -> Result<()> {
    let (_, session) = open_session(config, store).await?;
    let checkpoint = match checkpoint {
        Some(path) => FileCheckpointStore::new(path)
            .load()
            .await
            .context("Failed to load checkpoint")?,
        None => Checkpoint::new(),
    };

    let progress = session
        .progress(&checkpoint)
        .await
        .context("Failed to count records")?;
    println!("{}", progress.to_json()?);
    Ok(())
}

/// Write one outbound batch.
async fn cmd_produce(
    config: SyncConfig,
    store: &Path,
    resource_type: &str,
    since: i64,
    offset: usize,
    size: Option<usize>,
    output: Option<&Path>,
) -> Result<()> {
    let size = size.unwrap_or(config.batch_size);
    let (_, session) = open_session(config, store).await?;
    let window = BatchWindow::new(offset, size).context("Invalid batch window")?;

    let outbound = session
        .produce_batch(resource_type, since, window)
        .await
        .with_context(|| format!("Failed to produce {} batch", resource_type))?;

    for failure in &outbound.failures {
        warn!("Skipped {}", failure);
    }
    info!(
        "Produced {} of {} {} resources, high-water mark {}",
        outbound.batch.len(),
        outbound.page_len,
        resource_type,
        outbound.batch.high_water_mark
    );

    let json = outbound.batch.to_json()?;
    match output {
        Some(path) => tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

/// Apply one inbound batch and save the snapshot.
async fn cmd_apply(
    config: SyncConfig,
    store: &Path,
    resource_type: &str,
    batch: &Path,
    prior: i64,
) -> Result<()> {
    let (memory, session) = open_session(config, store).await?;
    let content = tokio::fs::read_to_string(batch)
        .await
        .with_context(|| format!("Failed to read batch {}", batch.display()))?;
    let batch = WireBatch::from_json(&content).context("Invalid batch file")?;

    let result = session
        .apply_batch(resource_type, prior, &batch)
        .await
        .with_context(|| format!("Failed to apply {} batch", resource_type))?;

    memory
        .save_snapshot(store)
        .await
        .context("Failed to save store snapshot")?;

    for failure in &result.failures {
        warn!("Rejected {}", failure);
    }
    println!("Batch applied!");
    println!("  Applied: {} ({} new)", result.applied, result.created);
    println!("  Failed: {}", result.failures.len());
    println!("  High-water mark: {}", result.high_water_mark);
    Ok(())
}

/// Run a full transfer between two snapshots.
async fn cmd_transfer(config: SyncConfig, from: &Path, to: &Path, checkpoint: &Path) -> Result<()> {
    let (_, source) = open_session(config.clone(), from).await?;
    let (target_store, target) = open_session(config, to).await?;

    let checkpoints = SnapshotCheckpointStore {
        store: target_store.clone(),
        snapshot: to.to_path_buf(),
        checkpoints: FileCheckpointStore::new(checkpoint),
    };
    let driver = TransferDriver::new(Arc::new(source), Arc::new(target), Arc::new(checkpoints));

    let cancel = driver.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current batch");
            cancel.cancel();
        }
    });

    let outcome = driver.run().await;

    // Everything applied so far is covered by the saved checkpoint.
    target_store
        .save_snapshot(to)
        .await
        .context("Failed to save receiving store snapshot")?;

    let report = outcome.context("Transfer failed")?;

    println!("Transfer complete!");
    println!("  Expected: {}", report.expected.total);
    println!("  Sent: {}", report.progress.total_sent());
    println!("  Applied: {}", report.progress.total_applied());
    println!("  Failed: {}", report.progress.total_failed());
    println!("  Duration: {:?}", report.duration);
    for entry in report.progress.entries() {
        println!(
            "  {:<24} {} batches, {} applied, checkpoint {}",
            entry.data_type,
            entry.batches,
            entry.applied,
            entry.state.checkpoint()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirlink_common::Resource;
    use fhirlink_store::ResourceStore;

    #[tokio::test]
    async fn test_snapshot_written_before_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("to.json");
        let checkpoint_path = dir.path().join("checkpoint.json");

        let store = Arc::new(MemoryStore::new());
        let checkpoints = SnapshotCheckpointStore {
            store: store.clone(),
            snapshot: snapshot.clone(),
            checkpoints: FileCheckpointStore::new(&checkpoint_path),
        };

        let patient = Resource::new("Patient", "p1", 100).unwrap();
        store.upsert(patient).await.unwrap();
        checkpoints
            .save(&Checkpoint::new().with("Patient", 100))
            .await
            .unwrap();

        let on_disk = MemoryStore::load_snapshot(&snapshot).await.unwrap();
        assert!(on_disk.get("Patient", "p1").await.is_ok());
        assert_eq!(checkpoints.load().await.unwrap().get("Patient"), 100);
    }

    #[tokio::test]
    async fn test_transfer_leaves_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from.json");
        let to = dir.path().join("to.json");
        let checkpoint = dir.path().join("checkpoint.json");

        let source = MemoryStore::new();
        for (id, ts) in [("p1", 100), ("p2", 200), ("p3", 300)] {
            let patient = Resource::new("Patient", id, ts).unwrap();
            source.upsert(patient).await.unwrap();
        }
        source.save_snapshot(&from).await.unwrap();

        let config = SyncConfig::default()
            .with_resources(["Patient"])
            .with_batch_size(2);
        cmd_transfer(config, &from, &to, &checkpoint).await.unwrap();

        let received = MemoryStore::load_snapshot(&to).await.unwrap();
        assert_eq!(received.len().unwrap(), 3);
        let saved = FileCheckpointStore::new(&checkpoint).load().await.unwrap();
        assert_eq!(saved.get("Patient"), 300);
    }
}
