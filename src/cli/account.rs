//! User and profile CLI commands.

use anyhow::{Context, Result};
use clap::Subcommand;

use super::open_store;
use crate::config;
use crate::domain::{TranscriptionParameters, UserId};
use crate::store::ProfileRepository;

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Create a user
    Add {
        username: String,

        /// Queue imported files for transcription right away
        #[arg(long)]
        auto: bool,
    },

    /// Configure auto-transcription for a user
    Auto {
        user_id: UserId,

        /// Turn auto-transcription off
        #[arg(long)]
        disable: bool,

        /// Preferred profile (falls back to the system default)
        #[arg(short, long)]
        profile: Option<String>,
    },
}

/// Profile subcommands
#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// List transcription profiles
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Create a transcription profile
    Add {
        name: String,

        /// Model name
        #[arg(short, long, default_value = "base")]
        model: String,

        /// Spoken language (detected when omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// Enable speaker diarization
        #[arg(long)]
        diarize: bool,

        /// Make this the system default profile
        #[arg(long)]
        default: bool,
    },
}

/// Execute a user command
pub async fn execute_user(command: UserCommands) -> Result<()> {
    let store = open_store(config::config()?)?;

    match command {
        UserCommands::Add { username, auto } => {
            let user = store.create_user(&username, auto)?;
            println!("✅ Created user {} ({})", user.id, user.username);
        }
        UserCommands::Auto {
            user_id,
            disable,
            profile,
        } => {
            if let Some(profile_id) = &profile {
                ProfileRepository::find_by_id(&store, profile_id)
                    .await?
                    .with_context(|| format!("Profile not found: {}", profile_id))?;
            }
            store.set_auto_transcription(user_id, !disable, profile.as_deref())?;
            println!(
                "Auto-transcription for user {}: {}",
                user_id,
                if disable { "off" } else { "on" }
            );
        }
    }

    Ok(())
}

/// Execute a profile command
pub async fn execute_profile(command: ProfileCommands) -> Result<()> {
    let store = open_store(config::config()?)?;

    match command {
        ProfileCommands::List { limit } => {
            let profiles = store.list(0, limit).await?;
            if profiles.is_empty() {
                println!("No profiles.");
                return Ok(());
            }
            for profile in profiles {
                println!(
                    "{} {}  {}  model={} language={} diarize={}",
                    if profile.is_default { "*" } else { " " },
                    profile.id,
                    profile.name,
                    profile.parameters.model,
                    profile.parameters.language.as_deref().unwrap_or("auto"),
                    profile.parameters.diarize
                );
            }
        }
        ProfileCommands::Add {
            name,
            model,
            language,
            diarize,
            default,
        } => {
            let parameters = TranscriptionParameters {
                model,
                language,
                diarize,
                ..Default::default()
            };
            let profile = store.create_profile(&name, parameters, default)?;
            println!("✅ Created profile {} ({})", profile.id, profile.name);
        }
    }

    Ok(())
}
