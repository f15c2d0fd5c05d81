//! Storage interfaces consumed by the watch runtime.
//!
//! The runtime never talks to a database directly; it goes through these
//! traits so the persistence layer can be swapped. Errors are plain
//! `anyhow::Result` because they are adapter-specific and the runtime only
//! needs to surface them.
//!
//! [`SqliteStore`] is the bundled implementation used by the CLI.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{
    FolderId, NewWatchedFolder, TranscriptionJob, TranscriptionProfile, User, UserId,
    WatchedFolder,
};

pub use sqlite::SqliteStore;

/// Persistence for watched folder rows
#[async_trait]
pub trait FolderRepository: Send + Sync {
    /// Insert a new row and return it with its assigned id
    async fn create(&self, folder: NewWatchedFolder) -> Result<WatchedFolder>;

    /// Persist the mutable fields of an existing row
    async fn update(&self, folder: &WatchedFolder) -> Result<()>;

    /// Delete a row by id (no error if it is already gone)
    async fn delete(&self, id: FolderId) -> Result<()>;

    /// All folders of a user, ordered by path
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<WatchedFolder>>;

    /// All enabled folders, ordered by id
    async fn find_enabled(&self) -> Result<Vec<WatchedFolder>>;

    /// Uniqueness lookup on (owner, path)
    async fn find_by_user_and_path(
        &self,
        user_id: UserId,
        path: &str,
    ) -> Result<Option<WatchedFolder>>;

    /// Lookup scoped to the owner; `None` for unknown or foreign ids
    async fn find_by_user_and_id(
        &self,
        user_id: UserId,
        id: FolderId,
    ) -> Result<Option<WatchedFolder>>;
}

/// Persistence for transcription jobs
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &TranscriptionJob) -> Result<()>;

    /// Persist status, parameters and diarization flag
    async fn update(&self, job: &TranscriptionJob) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<TranscriptionJob>>;
}

/// User lookup
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;
}

/// Transcription profile lookup
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<TranscriptionProfile>>;

    /// The system default profile, if one is flagged
    async fn find_default(&self) -> Result<Option<TranscriptionProfile>>;

    /// Profiles ordered by name
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<TranscriptionProfile>>;
}
