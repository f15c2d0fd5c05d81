//! Transcription queue CLI commands.

use anyhow::Result;
use clap::Subcommand;

use crate::config;
use crate::queue::TranscriptionQueue;

/// Queue subcommands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Show queue status
    Status,

    /// Claim the oldest pending job and print its id
    Next,
}

/// Execute a queue command
pub async fn execute(command: QueueCommands) -> Result<()> {
    let queue = TranscriptionQueue::open_default().await?;

    match command {
        QueueCommands::Status => {
            let status = queue.status().await?;
            let pending = queue.pending().await?;

            println!("Queue file: {}", config::config()?.queue_path.display());
            println!("  Pending: {}", status.pending);
            println!("  Claimed: {}", status.claimed);
            println!("  Total:   {}", status.total());

            if !pending.is_empty() {
                println!();
                println!("Next up:");
                for entry in pending.iter().take(10) {
                    println!(
                        "  {}  (queued {})",
                        entry.job_id,
                        entry.enqueued_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
        QueueCommands::Next => match queue.claim_next().await? {
            Some(entry) => println!("{}", entry.job_id),
            None => eprintln!("Queue is empty"),
        },
    }

    Ok(())
}
