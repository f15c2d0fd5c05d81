//! In-memory runtime status per watched folder.
//!
//! The board is shared by the service and its runners. Entries are created
//! lazily and only removed when a folder is deleted.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;

use crate::domain::{FolderId, RuntimeStatus};

/// Shared map of folder id to runtime status
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    statuses: Arc<RwLock<HashMap<FolderId, RuntimeStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status, or the empty status when none was recorded yet
    pub fn get(&self, folder_id: FolderId) -> RuntimeStatus {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&folder_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Recorded status, if any
    pub fn lookup(&self, folder_id: FolderId) -> Option<RuntimeStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&folder_id)
            .cloned()
    }

    /// Apply `change` to the folder's status, creating it if needed
    pub fn update(&self, folder_id: FolderId, change: impl FnOnce(&mut RuntimeStatus)) {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        change(statuses.entry(folder_id).or_default());
    }

    /// Like [`update`](Self::update), but skipped once `retired` is set.
    /// The flag is read under the write lock, so a concurrent `clear` either
    /// sees the change or the change sees the flag.
    fn update_unless_retired(
        &self,
        folder_id: FolderId,
        retired: &AtomicBool,
        change: impl FnOnce(&mut RuntimeStatus),
    ) {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        if retired.load(Ordering::SeqCst) {
            return;
        }
        change(statuses.entry(folder_id).or_default());
    }

    pub fn set_active(&self, folder_id: FolderId, active: bool) {
        self.update(folder_id, |status| status.active = active);
    }

    /// Runner attached: active and error cleared
    pub fn mark_started(&self, folder_id: FolderId) {
        self.update(folder_id, |status| {
            status.active = true;
            status.last_runtime_error = None;
        });
    }

    /// Watch could not attach
    pub fn mark_start_failed(&self, folder_id: FolderId, error: &str) {
        self.update(folder_id, |status| {
            status.active = false;
            status.last_runtime_error = Some(error.to_string());
        });
    }

    /// Flip every known folder to inactive
    pub fn deactivate_all(&self) {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        for status in statuses.values_mut() {
            status.active = false;
        }
    }

    pub fn clear(&self, folder_id: FolderId) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&folder_id);
    }
}

/// A runner's view of the board, scoped to its folder.
///
/// Once retired (the folder was deleted) further reports are dropped, so a
/// late import cannot resurrect a cleared status entry.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    folder_id: FolderId,
    board: StatusBoard,
    retired: Arc<AtomicBool>,
}

impl StatusReporter {
    pub fn new(folder_id: FolderId, board: StatusBoard) -> Self {
        Self {
            folder_id,
            board,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop reporting. Call before clearing the folder's status.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn runtime_error(&self, error: &str) {
        self.board
            .update_unless_retired(self.folder_id, &self.retired, |status| {
                status.last_runtime_error = Some(error.to_string());
            });
    }

    pub fn imported(&self, source: &Path) {
        let now = Utc::now();
        self.board
            .update_unless_retired(self.folder_id, &self.retired, |status| {
                status.last_runtime_error = None;
                status.last_imported_at = Some(now);
                status.last_imported_file = Some(source.to_path_buf());
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_status_created_lazily() {
        let board = StatusBoard::new();

        assert_eq!(board.get(1), RuntimeStatus::default());
        assert!(board.lookup(1).is_none());

        StatusReporter::new(1, board.clone()).runtime_error("watcher error: overflow");
        let status = board.lookup(1).unwrap();
        assert!(!status.active);
        assert_eq!(status.last_runtime_error.as_deref(), Some("watcher error: overflow"));
    }

    #[test]
    fn test_history_survives_deactivation() {
        let board = StatusBoard::new();
        let reporter = StatusReporter::new(3, board.clone());
        board.mark_started(3);
        reporter.imported(Path::new("/in/a.mp3"));
        reporter.runtime_error("later failure");

        board.deactivate_all();

        let status = board.get(3);
        assert!(!status.active);
        assert_eq!(status.last_imported_file, Some(PathBuf::from("/in/a.mp3")));
        assert!(status.last_imported_at.is_some());
        assert_eq!(status.last_runtime_error.as_deref(), Some("later failure"));
    }

    #[test]
    fn test_import_clears_error() {
        let board = StatusBoard::new();
        board.mark_start_failed(4, "failed to watch");
        StatusReporter::new(4, board.clone()).imported(Path::new("/in/b.wav"));

        assert_eq!(board.get(4).last_runtime_error, None);
    }

    #[test]
    fn test_retired_reporter_is_silent() {
        let board = StatusBoard::new();
        let reporter = StatusReporter::new(9, board.clone());

        reporter.imported(Path::new("/in/c.flac"));
        assert!(board.lookup(9).is_some());

        reporter.retire();
        board.clear(9);
        reporter.runtime_error("too late");
        reporter.imported(Path::new("/in/d.flac"));

        assert!(board.lookup(9).is_none());
    }

    #[test]
    fn test_retire_races_with_reports() {
        // Reporters hammer the board while the folder is retired and cleared;
        // whatever interleaving happens, nothing may survive the clear.
        for _ in 0..50 {
            let board = StatusBoard::new();
            let reporter = StatusReporter::new(5, board.clone());

            let workers: Vec<_> = (0..4)
                .map(|n| {
                    let reporter = reporter.clone();
                    std::thread::spawn(move || {
                        for i in 0..200 {
                            if (n + i) % 2 == 0 {
                                reporter.imported(Path::new("/in/e.mp3"));
                            } else {
                                reporter.runtime_error("busy");
                            }
                        }
                    })
                })
                .collect();

            std::thread::yield_now();
            reporter.retire();
            board.clear(5);

            for worker in workers {
                worker.join().unwrap();
            }
            assert!(board.lookup(5).is_none());
        }
    }
}
