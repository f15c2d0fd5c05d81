//! Watch-folder runtime.
//!
//! [`WatchService`] keeps one [`FolderRunner`] per enabled folder. Runners
//! debounce filesystem events per path, wait for files to stop changing and
//! hand them to the shared [`Importer`], which copies them into managed
//! storage and creates transcription jobs. Failures inside runners never stop
//! them; they land in the folder's [`RuntimeStatus`](crate::domain::RuntimeStatus).

pub mod error;
pub mod importer;
pub mod media;
pub mod quiescence;
pub mod runner;
pub mod service;
pub mod status;

pub use error::FolderWatchError;
pub use importer::{AutoTranscription, ImportOutcome, Importer};
pub use media::{is_watchable_media_file, normalize_folder_path, SUPPORTED_MEDIA_EXTENSIONS};
pub use quiescence::{wait_for_stable_file, FileSignature, Quiescence, QuiescenceDetector};
pub use runner::{FolderRunner, RunnerState};
pub use service::{ReconcileReport, WatchDependencies, WatchService};
pub use status::{StatusBoard, StatusReporter};
