//! Domain types for mediawatch.
//!
//! - Folder: watched folder rows and their runtime status
//! - Job: transcription jobs created by imports
//! - Profile: users and transcription profiles

pub mod folder;
pub mod job;
pub mod profile;

// Re-export commonly used types
pub use folder::{FolderId, FolderView, NewWatchedFolder, RuntimeStatus, UserId, WatchedFolder};
pub use job::{JobStatus, TranscriptionJob};
pub use profile::{TranscriptionParameters, TranscriptionProfile, User};
