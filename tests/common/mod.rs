//! Shared fixtures for the watch service integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use mediawatch::config::WatchSettings;
use mediawatch::queue::JobQueue;
use mediawatch::store::SqliteStore;
use mediawatch::domain::FolderId;
use mediawatch::watch::{FolderRunner, WatchDependencies, WatchService};

/// Queue double that records job ids and can be switched to fail or stall
#[derive(Default)]
pub struct RecordingQueue {
    fail: AtomicBool,
    stall: AtomicBool,
    enqueued: Mutex<Vec<String>>,
}

impl RecordingQueue {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every enqueue hang for an hour
    pub fn set_stalled(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn enqueued(&self) -> Vec<String> {
        self.enqueued.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue_job(&self, job_id: &str) -> Result<()> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("queue unavailable");
        }
        self.enqueued.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

/// Timings small enough for end-to-end runs
pub fn fast_settings() -> WatchSettings {
    WatchSettings {
        debounce: Duration::from_millis(100),
        stability_interval: Duration::from_millis(50),
        stability_checks: 3,
        min_file_bytes: 1,
        import_timeout: Duration::from_secs(10),
        stop_grace: Duration::from_secs(1),
        max_concurrent_imports: 4,
        reconcile_interval: Duration::from_secs(1),
    }
}

pub struct Harness {
    pub store: SqliteStore,
    pub queue: Arc<RecordingQueue>,
    pub service: WatchService,
    pub uploads: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: WatchSettings) -> Self {
        let store = SqliteStore::open_in_memory().unwrap();
        let queue = Arc::new(RecordingQueue::default());
        let uploads = TempDir::new().unwrap();
        let shared = Arc::new(store.clone());

        let service = WatchService::new(
            settings,
            uploads.path().join("uploads"),
            WatchDependencies {
                folders: shared.clone(),
                jobs: shared.clone(),
                users: shared.clone(),
                profiles: shared,
                queue: queue.clone(),
            },
        );

        Self {
            store,
            queue,
            service,
            uploads,
        }
    }

    /// The live runner of a folder, if it has one
    pub fn runner(&self, folder_id: FolderId) -> Option<Arc<FolderRunner>> {
        self.service
            .runners()
            .into_iter()
            .find(|runner| runner.folder().id == folder_id)
    }

    pub fn job_count(&self) -> usize {
        self.store.list_jobs(1000).unwrap().len()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

pub fn path_str(path: &Path) -> String {
    path.display().to_string()
}
