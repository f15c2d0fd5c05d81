//! Registry of folder runners and the lifecycle API around it.
//!
//! Locks: the registry mutex (runners and reporters) is always taken before
//! the status board lock, and neither is held across I/O or an `.await`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::importer::Importer;
use super::media::normalize_folder_path;
use super::runner::FolderRunner;
use super::status::{StatusBoard, StatusReporter};
use super::FolderWatchError;
use crate::config::WatchSettings;
use crate::domain::{FolderId, FolderView, NewWatchedFolder, RuntimeStatus, UserId, WatchedFolder};
use crate::queue::JobQueue;
use crate::store::{FolderRepository, JobRepository, ProfileRepository, UserRepository};

/// Collaborators the service needs
#[derive(Clone)]
pub struct WatchDependencies {
    pub folders: Arc<dyn FolderRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub users: Arc<dyn UserRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub queue: Arc<dyn JobQueue>,
}

/// What a reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<FolderId>,
    pub stopped: Vec<FolderId>,
    pub failed: Vec<(FolderId, String)>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.failed.is_empty()
    }
}

#[derive(Default)]
struct Registry {
    runners: HashMap<FolderId, Arc<FolderRunner>>,
    /// One reporter per folder, reused across disable/enable
    reporters: HashMap<FolderId, StatusReporter>,
    /// Enabled folders whose watch could not attach; left alone by reconcile
    failed_starts: HashSet<FolderId>,
}

/// Owns one runner per enabled folder plus the runtime status of every folder
pub struct WatchService {
    settings: WatchSettings,
    folders: Arc<dyn FolderRepository>,
    importer: Arc<Importer>,
    registry: Mutex<Registry>,
    statuses: StatusBoard,
}

impl WatchService {
    pub fn new(settings: WatchSettings, upload_dir: PathBuf, deps: WatchDependencies) -> Self {
        let importer = Importer::new(
            upload_dir,
            deps.jobs,
            deps.users,
            deps.profiles,
            deps.queue,
            &settings,
        );

        Self {
            settings,
            folders: deps.folders,
            importer: Arc::new(importer),
            registry: Mutex::new(Registry::default()),
            statuses: StatusBoard::new(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a runner for every enabled folder.
    ///
    /// Folders that fail do not prevent the others from starting; the
    /// failures are returned together as [`FolderWatchError::RestoreFailed`].
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), FolderWatchError> {
        let folders = self.folders.find_enabled().await?;

        let mut failures = Vec::new();
        for folder in folders {
            let (id, path) = (folder.id, folder.path.clone());
            if let Err(e) = self.start_runner(folder).await {
                failures.push(format!("id={} path={:?}: {}", id, path, e));
            }
        }

        if failures.is_empty() {
            info!(runners = self.active_runner_count(), "Watch service started");
            return Ok(());
        }

        let err = FolderWatchError::RestoreFailed {
            count: failures.len(),
            details: failures.join("; "),
        };
        error!(error = %err, "Some watch folders could not be restored");
        Err(err)
    }

    /// Detach every runner, mark all folders inactive, then stop the runners
    /// concurrently. Each stop is bounded by the stop grace period.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let runners: Vec<Arc<FolderRunner>> = {
            let mut registry = self.registry();
            self.statuses.deactivate_all();
            registry.runners.drain().map(|(_, runner)| runner).collect()
        };

        let count = runners.len();
        let mut stopping = JoinSet::new();
        for runner in runners {
            stopping.spawn(async move { runner.stop().await });
        }
        while let Some(result) = stopping.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Runner stop task failed");
            }
        }

        info!(runners = count, "Watch service stopped");
    }

    /// Folders of `user_id` merged with their runtime status
    pub async fn list_user_folders(&self, user_id: UserId) -> Result<Vec<FolderView>, FolderWatchError> {
        let folders = self.folders.find_by_user(user_id).await?;
        Ok(folders
            .into_iter()
            .map(|folder| {
                let status = self.statuses.get(folder.id);
                FolderView::new(folder, status)
            })
            .collect())
    }

    /// Register a folder and, when enabled, start watching it.
    ///
    /// A folder whose watch cannot be attached is deleted again.
    #[instrument(skip(self))]
    pub async fn create_user_folder(
        &self,
        user_id: UserId,
        path: &str,
        recursive: bool,
        enabled: bool,
    ) -> Result<FolderView, FolderWatchError> {
        let normalized = normalize_folder_path(path)?;
        let path_key = normalized.to_string_lossy().into_owned();

        if self
            .folders
            .find_by_user_and_path(user_id, &path_key)
            .await?
            .is_some()
        {
            return Err(FolderWatchError::AlreadyExists);
        }

        let folder = self
            .folders
            .create(NewWatchedFolder {
                user_id,
                path: normalized,
                recursive,
                enabled,
            })
            .await?;
        info!(folder_id = folder.id, path = %path_key, "Created watch folder");

        if folder.enabled {
            if let Err(e) = self.start_runner(folder.clone()).await {
                if let Err(delete_err) = self.folders.delete(folder.id).await {
                    warn!(folder_id = folder.id, error = %delete_err, "Failed to roll back folder");
                }
                self.forget(folder.id);
                return Err(e);
            }
        }

        self.folder_view(user_id, folder.id).await
    }

    /// Enable or disable a folder. Unchanged values are a no-op.
    ///
    /// If the watch cannot be attached on enable, the folder is stored as
    /// disabled again and the error is returned.
    #[instrument(skip(self))]
    pub async fn set_user_folder_enabled(
        &self,
        user_id: UserId,
        folder_id: FolderId,
        enabled: bool,
    ) -> Result<FolderView, FolderWatchError> {
        let mut folder = self
            .folders
            .find_by_user_and_id(user_id, folder_id)
            .await?
            .ok_or(FolderWatchError::NotFound)?;

        if folder.enabled == enabled {
            return Ok(FolderView::new(folder, self.statuses.get(folder_id)));
        }

        folder.enabled = enabled;
        folder.updated_at = Utc::now();
        self.folders.update(&folder).await?;
        self.registry().failed_starts.remove(&folder_id);

        if enabled {
            if let Err(e) = self.start_runner(folder.clone()).await {
                folder.enabled = false;
                folder.updated_at = Utc::now();
                if let Err(revert_err) = self.folders.update(&folder).await {
                    warn!(folder_id, error = %revert_err, "Failed to revert folder to disabled");
                }
                self.registry().failed_starts.remove(&folder_id);
                return Err(e);
            }
        } else {
            self.stop_runner(folder_id).await;
        }

        info!(folder_id, enabled, "Updated watch folder");
        Ok(FolderView::new(folder, self.statuses.get(folder_id)))
    }

    /// Stop watching a folder, drop its status and delete it
    #[instrument(skip(self))]
    pub async fn delete_user_folder(
        &self,
        user_id: UserId,
        folder_id: FolderId,
    ) -> Result<(), FolderWatchError> {
        self.folders
            .find_by_user_and_id(user_id, folder_id)
            .await?
            .ok_or(FolderWatchError::NotFound)?;

        self.stop_runner(folder_id).await;
        self.forget(folder_id);
        self.folders.delete(folder_id).await?;

        info!(folder_id, "Deleted watch folder");
        Ok(())
    }

    /// Bring runners in line with storage: start enabled folders that have
    /// no runner and stop runners whose folder is gone or disabled.
    ///
    /// Folders whose watch failed to attach are not retried here.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport, FolderWatchError> {
        let enabled = self.folders.find_enabled().await?;
        let enabled_ids: HashSet<FolderId> = enabled.iter().map(|folder| folder.id).collect();

        let (stale, to_start) = {
            let registry = self.registry();
            let stale: Vec<FolderId> = registry
                .runners
                .keys()
                .filter(|id| !enabled_ids.contains(id))
                .copied()
                .collect();
            let to_start: Vec<WatchedFolder> = enabled
                .into_iter()
                .filter(|folder| {
                    !registry.runners.contains_key(&folder.id)
                        && !registry.failed_starts.contains(&folder.id)
                })
                .collect();
            (stale, to_start)
        };

        let mut report = ReconcileReport::default();
        for folder_id in stale {
            self.stop_runner(folder_id).await;
            report.stopped.push(folder_id);
        }
        for folder in to_start {
            let folder_id = folder.id;
            match self.start_runner(folder).await {
                Ok(()) => report.started.push(folder_id),
                Err(e) => report.failed.push((folder_id, e.to_string())),
            }
        }

        if !report.is_empty() {
            info!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                failed = report.failed.len(),
                "Reconciled watch folders"
            );
        }
        Ok(report)
    }

    /// Recorded runtime status of a folder, if any
    pub fn runtime_status(&self, folder_id: FolderId) -> Option<RuntimeStatus> {
        self.statuses.lookup(folder_id)
    }

    pub fn active_runner_count(&self) -> usize {
        self.registry().runners.len()
    }

    /// Live runners, ordered by folder id
    pub fn runners(&self) -> Vec<Arc<FolderRunner>> {
        let mut runners: Vec<Arc<FolderRunner>> = self.registry().runners.values().cloned().collect();
        runners.sort_by_key(|runner| runner.folder().id);
        runners
    }

    /// Start a runner unless one exists already, in which case the folder is
    /// only marked active again.
    async fn start_runner(&self, folder: WatchedFolder) -> Result<(), FolderWatchError> {
        let folder_id = folder.id;

        let reporter = {
            let mut registry = self.registry();
            if registry.runners.contains_key(&folder_id) {
                self.statuses.set_active(folder_id, true);
                return Ok(());
            }
            registry
                .reporters
                .entry(folder_id)
                .or_insert_with(|| StatusReporter::new(folder_id, self.statuses.clone()))
                .clone()
        };

        let runner = Arc::new(FolderRunner::new(
            folder,
            self.settings.clone(),
            Arc::clone(&self.importer),
            reporter,
        ));

        if let Err(e) = runner.start().await {
            self.registry().failed_starts.insert(folder_id);
            self.statuses.mark_start_failed(folder_id, &e.to_string());
            warn!(folder_id, error = %e, "Failed to start watching folder");
            return Err(e);
        }

        let duplicate = {
            let mut registry = self.registry();
            if registry.runners.contains_key(&folder_id) {
                true
            } else {
                registry.runners.insert(folder_id, Arc::clone(&runner));
                registry.failed_starts.remove(&folder_id);
                self.statuses.mark_started(folder_id);
                false
            }
        };

        // Lost a race with a concurrent start
        if duplicate {
            runner.stop().await;
        }
        Ok(())
    }

    async fn stop_runner(&self, folder_id: FolderId) {
        let runner = {
            let mut registry = self.registry();
            let runner = registry.runners.remove(&folder_id);
            self.statuses.set_active(folder_id, false);
            runner
        };

        if let Some(runner) = runner {
            runner.stop().await;
        }
    }

    /// Drop all in-memory state of a folder. Late reports from imports that
    /// are still running are discarded.
    fn forget(&self, folder_id: FolderId) {
        let mut registry = self.registry();
        if let Some(reporter) = registry.reporters.remove(&folder_id) {
            reporter.retire();
        }
        registry.failed_starts.remove(&folder_id);
        self.statuses.clear(folder_id);
    }

    async fn folder_view(
        &self,
        user_id: UserId,
        folder_id: FolderId,
    ) -> Result<FolderView, FolderWatchError> {
        let folder = self
            .folders
            .find_by_user_and_id(user_id, folder_id)
            .await?
            .ok_or(FolderWatchError::NotFound)?;
        let status = self.statuses.get(folder_id);
        Ok(FolderView::new(folder, status))
    }
}
