//! Watched folder CLI commands.
//!
//! - `mediawatch folder list` - Folders of a user
//! - `mediawatch folder add <path>` - Register a folder
//! - `mediawatch folder enable|disable <id>` - Toggle watching
//! - `mediawatch folder remove <id>` - Delete a folder
//!
//! Changes go through a short-lived `WatchService`, so a folder is only
//! stored as enabled if its watch can actually be attached.

use anyhow::Result;
use clap::Subcommand;

use super::{build_service, open_store};
use crate::config;
use crate::domain::{FolderId, FolderView, UserId};
use crate::watch::WatchService;

/// Folder subcommands
#[derive(Subcommand, Debug)]
pub enum FolderCommands {
    /// List watched folders
    List {
        /// Owning user
        #[arg(short, long, env = "MEDIAWATCH_USER", default_value = "1")]
        user: UserId,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Register a folder to watch
    Add {
        /// Directory to watch
        path: String,

        /// Owning user
        #[arg(short, long, env = "MEDIAWATCH_USER", default_value = "1")]
        user: UserId,

        /// Only watch the top-level directory
        #[arg(long)]
        no_recursive: bool,

        /// Store the folder without watching it yet
        #[arg(long)]
        disabled: bool,
    },

    /// Resume watching a folder
    Enable {
        folder_id: FolderId,

        #[arg(short, long, env = "MEDIAWATCH_USER", default_value = "1")]
        user: UserId,
    },

    /// Pause watching a folder
    Disable {
        folder_id: FolderId,

        #[arg(short, long, env = "MEDIAWATCH_USER", default_value = "1")]
        user: UserId,
    },

    /// Stop watching and delete a folder
    Remove {
        folder_id: FolderId,

        #[arg(short, long, env = "MEDIAWATCH_USER", default_value = "1")]
        user: UserId,
    },
}

/// Execute a folder command
pub async fn execute(command: FolderCommands) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let service = build_service(cfg, &store).await?;

    let result = run(&service, command).await;
    // Runners started for validation must not outlive the command
    service.stop().await;
    result
}

async fn run(service: &WatchService, command: FolderCommands) -> Result<()> {
    match command {
        FolderCommands::List { user, json } => {
            let folders = service.list_user_folders(user).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&folders)?);
            } else {
                print_folders(&folders);
            }
        }
        FolderCommands::Add {
            path,
            user,
            no_recursive,
            disabled,
        } => {
            let view = service
                .create_user_folder(user, &path, !no_recursive, !disabled)
                .await?;
            println!(
                "✅ Added folder {} ({})",
                view.folder.id,
                view.folder.path.display()
            );
        }
        FolderCommands::Enable { folder_id, user } => {
            let view = service.set_user_folder_enabled(user, folder_id, true).await?;
            println!("▶️  Enabled folder {} ({})", folder_id, view.folder.path.display());
        }
        FolderCommands::Disable { folder_id, user } => {
            let view = service.set_user_folder_enabled(user, folder_id, false).await?;
            println!("⏸️  Disabled folder {} ({})", folder_id, view.folder.path.display());
        }
        FolderCommands::Remove { folder_id, user } => {
            service.delete_user_folder(user, folder_id).await?;
            println!("🗑️  Removed folder {}", folder_id);
        }
    }

    Ok(())
}

fn print_folders(folders: &[FolderView]) {
    if folders.is_empty() {
        println!("No watched folders.");
        return;
    }

    println!("{:<6}  {:<8}  {:<9}  PATH", "ID", "ENABLED", "RECURSIVE");
    for view in folders {
        let folder = &view.folder;
        println!(
            "{:<6}  {:<8}  {:<9}  {}",
            folder.id,
            if folder.enabled { "yes" } else { "no" },
            if folder.recursive { "yes" } else { "no" },
            folder.path.display()
        );
        if let Some(error) = &view.last_runtime_error {
            println!("        last error: {}", error);
        }
    }
}
