//! Command-line interface for mediawatch.
//!
//! `serve` runs the watch service until Ctrl+C. The other commands manage
//! folders, users, profiles and the queue against the same database, so a
//! running `serve` picks their changes up on its next reconcile.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::{self, ResolvedConfig};
use crate::queue::TranscriptionQueue;
use crate::store::SqliteStore;
use crate::watch::{WatchDependencies, WatchService};

pub mod account;
pub mod folder;
pub mod queue;

/// mediawatch - Watch folders that turn media files into transcription jobs
#[derive(Parser, Debug)]
#[command(name = "mediawatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch all enabled folders until Ctrl+C
    Serve,

    /// Manage watched folders
    Folder {
        #[command(subcommand)]
        command: folder::FolderCommands,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: account::UserCommands,
    },

    /// Manage transcription profiles
    Profile {
        #[command(subcommand)]
        command: account::ProfileCommands,
    },

    /// List recent transcription jobs
    Jobs {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Inspect the transcription queue
    Queue {
        #[command(subcommand)]
        command: queue::QueueCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve => serve().await,
            Commands::Folder { command } => folder::execute(command).await,
            Commands::User { command } => account::execute_user(command).await,
            Commands::Profile { command } => account::execute_profile(command).await,
            Commands::Jobs { limit } => list_jobs(limit).await,
            Commands::Queue { command } => queue::execute(command).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Open the configured database
pub(crate) fn open_store(cfg: &ResolvedConfig) -> Result<SqliteStore> {
    SqliteStore::open(&cfg.database_path)
}

/// Build a watch service over the configured store and queue
pub(crate) async fn build_service(cfg: &ResolvedConfig, store: &SqliteStore) -> Result<WatchService> {
    let queue = TranscriptionQueue::open_default()
        .await
        .context("Failed to open transcription queue")?;
    let store = Arc::new(store.clone());

    Ok(WatchService::new(
        cfg.watch.clone(),
        cfg.upload_dir.clone(),
        WatchDependencies {
            folders: store.clone(),
            jobs: store.clone(),
            users: store.clone(),
            profiles: store,
            queue: Arc::new(queue),
        },
    ))
}

/// Run the watch service, reconciling with the database on an interval
async fn serve() -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let service = build_service(cfg, &store).await?;

    // Folders that fail to restore are reported but do not stop the others
    if let Err(e) = service.start().await {
        warn!(error = %e, "Starting with some folders unwatched");
        eprintln!("⚠️  {}", e);
    }

    println!("👁️  Watching {} folder(s)", service.active_runner_count());
    for runner in service.runners() {
        let folder = runner.folder();
        let dirs = runner.watched_directories().len();
        println!(
            "    [{}] {} ({} {})",
            folder.id,
            folder.path.display(),
            dirs,
            if dirs == 1 { "directory" } else { "directories" }
        );
    }
    println!("    Uploads:  {}", cfg.upload_dir.display());
    println!("    Press Ctrl+C to stop");
    println!();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut reconcile = tokio::time::interval(cfg.watch.reconcile_interval);
    // The first tick completes immediately
    reconcile.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = reconcile.tick() => {
                if let Err(e) = service.reconcile().await {
                    warn!(error = %e, "Reconcile failed");
                }
            }
        }
    }

    println!();
    println!("🛑 Stopping watchers...");
    service.stop().await;
    Ok(())
}

/// List recent jobs
async fn list_jobs(limit: usize) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let jobs = store.list_jobs(limit)?;

    if jobs.is_empty() {
        println!("No jobs yet.");
        return Ok(());
    }

    println!("{:<36}  {:<10}  {:<20}  TITLE", "ID", "STATUS", "CREATED");
    for job in jobs {
        println!(
            "{:<36}  {:<10}  {:<20}  {}",
            job.id,
            job.status,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.title.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;
    let watch = &cfg.watch;

    println!("mediawatch configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Uploads:  {}", cfg.upload_dir.display());
    println!("  Database: {}", cfg.database_path.display());
    println!("  Queue:    {}", cfg.queue_path.display());
    println!();
    println!("Watch:");
    println!("  Debounce:           {:?}", watch.debounce);
    println!(
        "  Stability:          {} checks every {:?} (min {} bytes)",
        watch.stability_checks, watch.stability_interval, watch.min_file_bytes
    );
    println!("  Import timeout:     {:?}", watch.import_timeout);
    println!("  Stop grace:         {:?}", watch.stop_grace);
    match watch.max_concurrent_imports {
        0 => println!("  Concurrent imports: unbounded"),
        n => println!("  Concurrent imports: {}", n),
    }
    println!("  Reconcile interval: {:?}", watch.reconcile_interval);
    println!();
    println!("Queue:");
    match cfg.queue_max_pending {
        Some(capacity) => println!("  Max pending: {}", capacity),
        None => println!("  Max pending: unbounded"),
    }

    Ok(())
}
