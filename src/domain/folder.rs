//! Watched folders and their live runtime state.
//!
//! A `WatchedFolder` is the persisted configuration row. `RuntimeStatus`
//! lives only in memory and is merged into a `FolderView` for callers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a persisted watched folder
pub type FolderId = i64;

/// Identifier of a user
pub type UserId = i64;

/// A user-configured directory monitored for new media files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedFolder {
    /// Storage-assigned identifier
    pub id: FolderId,

    /// Owning user
    pub user_id: UserId,

    /// Absolute, normalized directory path
    pub path: PathBuf,

    /// Whether subdirectories are watched too
    pub recursive: bool,

    /// Whether the folder should have a live watch
    pub enabled: bool,

    /// When the row was created
    pub created_at: DateTime<Utc>,

    /// When the row was last updated
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to persist a new watched folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWatchedFolder {
    pub user_id: UserId,
    pub path: PathBuf,
    pub recursive: bool,
    pub enabled: bool,
}

/// Best-effort runtime health of one folder (never persisted)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    /// A runner currently holds a live watch for the folder
    pub active: bool,

    /// Most recent error from the watch or import path
    pub last_runtime_error: Option<String>,

    /// When the last file was imported
    pub last_imported_at: Option<DateTime<Utc>>,

    /// Source path of the last imported file
    pub last_imported_file: Option<PathBuf>,
}

/// Persisted folder configuration merged with its runtime status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderView {
    #[serde(flatten)]
    pub folder: WatchedFolder,

    pub active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_runtime_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_imported_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_imported_file: Option<PathBuf>,
}

impl FolderView {
    /// Merge a folder with its status. A disabled folder is never reported active.
    pub fn new(folder: WatchedFolder, status: RuntimeStatus) -> Self {
        let active = folder.enabled && status.active;
        Self {
            folder,
            active,
            last_runtime_error: status.last_runtime_error,
            last_imported_at: status.last_imported_at,
            last_imported_file: status.last_imported_file,
        }
    }
}
