//! Errors of the watch runtime.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the watch service or recorded in folder status
#[derive(Debug, Error)]
pub enum FolderWatchError {
    /// Empty, unresolvable, nonexistent or non-directory input
    #[error("invalid folder path: {0}")]
    InvalidPath(String),

    #[error("folder is already being watched")]
    AlreadyExists,

    #[error("watched folder not found")]
    NotFound,

    /// The OS watch could not be attached
    #[error("failed to watch {path}: {source}")]
    WatchSetup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Non-fatal error reported by a running watcher
    #[error("watcher error: {0}")]
    Watcher(#[source] notify::Error),

    #[error("file {0} did not stabilize before timeout")]
    StabilizationTimeout(PathBuf),

    #[error("file {0} disappeared before it stabilized")]
    StabilizationNotFound(PathBuf),

    #[error("failed to import {path}: {source:#}")]
    Import {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to restore {count} watch folder(s): {details}")]
    RestoreFailed { count: usize, details: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl FolderWatchError {
    pub(crate) fn import(path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        Self::Import {
            path: path.into(),
            source,
        }
    }
}
