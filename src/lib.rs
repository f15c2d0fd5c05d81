//! mediawatch - Watch folders that turn media files into transcription jobs
//!
//! Users register directories to watch. Audio and video files that appear
//! in them are copied into managed storage once they stop changing, and a
//! transcription job is created for each. Users with auto-transcription
//! enabled get the job queued right away with their default profile.
//!
//! # Modules
//!
//! - `watch`: Watch-folder runtime (service, runners, stability, import)
//! - `store`: Storage traits and the SQLite implementation
//! - `queue`: Transcription queue (JSONL)
//! - `domain`: Data structures (WatchedFolder, TranscriptionJob, User)
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register a folder and run the watcher
//! mediawatch folder add ~/Recordings --user 1
//! mediawatch serve
//!
//! # Inspect results
//! mediawatch jobs
//! mediawatch queue status
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod queue;
pub mod store;
pub mod watch;

// Re-export main types at crate root for convenience
pub use domain::{FolderView, RuntimeStatus, TranscriptionJob, WatchedFolder};
pub use queue::{JobQueue, TranscriptionQueue};
pub use store::SqliteStore;
pub use watch::{FolderWatchError, WatchDependencies, WatchService};
