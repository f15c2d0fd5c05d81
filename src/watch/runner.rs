//! One live filesystem watch per watched folder.
//!
//! A runner owns a `notify` watcher whose callback feeds an unbounded
//! channel, a run loop draining that channel, and a table of per-path
//! debounce timers. When a timer fires the file is probed for stability
//! and handed to the shared [`Importer`].
//!
//! Watches are always non-recursive; recursive folders get one watch per
//! directory, grown as directories appear. Directory walks run on the
//! blocking pool.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::importer::{AutoTranscription, Importer};
use super::media::is_watchable_media_file;
use super::quiescence::{wait_for_stable_file, FileSignature};
use super::status::StatusReporter;
use super::FolderWatchError;
use crate::config::WatchSettings;
use crate::domain::WatchedFolder;

/// Lifecycle of a runner. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Built, watch not attached yet
    Created,
    /// Watch attached, run loop alive
    Watching,
    Stopped,
}

/// Which filesystem events count as a file appearing or changing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Created,
    Written,
    Removed,
}

fn classify(kind: &EventKind) -> Option<Trigger> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) => Some(Trigger::Created),
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(Trigger::Written),
        EventKind::Remove(_) => Some(Trigger::Removed),
        _ => None,
    }
}

/// Debounce and import bookkeeping, private to one runner
#[derive(Default)]
struct PendingImports {
    /// Scheduled timer per path, tagged with its generation
    timers: HashMap<PathBuf, (u64, AbortHandle)>,
    next_generation: u64,
    /// Paths whose import is running right now
    in_flight: HashSet<PathBuf>,
    /// Paths that saw another event while in flight
    rearm: HashSet<PathBuf>,
    /// Last imported signature per path
    imported: HashMap<PathBuf, FileSignature>,
    stopped: bool,
}

struct RunnerShared {
    folder: WatchedFolder,
    settings: WatchSettings,
    importer: Arc<Importer>,
    reporter: StatusReporter,
    watcher: Mutex<Option<RecommendedWatcher>>,
    watched: Mutex<HashSet<PathBuf>>,
    pending: Mutex<PendingImports>,
}

struct Control {
    state: RunnerState,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Watches one folder and imports media files that settle in it
pub struct FolderRunner {
    shared: Arc<RunnerShared>,
    control: Mutex<Control>,
    /// Serializes start and stop, which both await
    lifecycle: tokio::sync::Mutex<()>,
}

impl FolderRunner {
    pub fn new(
        folder: WatchedFolder,
        settings: WatchSettings,
        importer: Arc<Importer>,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                folder,
                settings,
                importer,
                reporter,
                watcher: Mutex::new(None),
                watched: Mutex::new(HashSet::new()),
                pending: Mutex::new(PendingImports::default()),
            }),
            control: Mutex::new(Control {
                state: RunnerState::Created,
                stop_tx: None,
                task: None,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn folder(&self) -> &WatchedFolder {
        &self.shared.folder
    }

    pub fn state(&self) -> RunnerState {
        self.control().state
    }

    /// Directories currently under watch, sorted
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = lock(&self.shared.watched).iter().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Number of debounce timers waiting to fire
    pub fn pending_imports(&self) -> usize {
        lock(&self.shared.pending).timers.len()
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        lock(&self.control)
    }

    /// Attach the watch and spawn the run loop.
    ///
    /// Fails if the folder root cannot be watched. Subdirectories that cannot
    /// be watched are reported as runtime errors instead.
    pub async fn start(&self) -> Result<(), FolderWatchError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            RunnerState::Created => {}
            RunnerState::Watching => return Ok(()),
            RunnerState::Stopped => {
                return Err(FolderWatchError::WatchSetup {
                    path: self.shared.folder.path.clone(),
                    source: notify::Error::generic("runner was already stopped"),
                })
            }
        }

        let root = self.shared.folder.path.clone();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = event_tx.send(result);
        })
        .map_err(|source| FolderWatchError::WatchSetup {
            path: root.clone(),
            source,
        })?;
        *lock(&self.shared.watcher) = Some(watcher);

        // Files already present are left alone
        if let Err(e) = self.shared.watch_tree_blocking(root.clone()).await {
            lock(&self.shared.watcher).take();
            lock(&self.shared.watched).clear();
            self.control().state = RunnerState::Stopped;
            return Err(e);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let mut control = self.control();
        control.task = Some(tokio::spawn(run(shared, event_rx, stop_rx)));
        control.stop_tx = Some(stop_tx);
        control.state = RunnerState::Watching;

        info!(
            folder_id = self.shared.folder.id,
            path = %root.display(),
            recursive = self.shared.folder.recursive,
            "Watching folder"
        );
        Ok(())
    }

    /// Close the watch, cancel pending timers and wait for the run loop.
    ///
    /// Safe to call more than once. Imports already running are left to
    /// finish; a loop that outlives the stop grace period is abandoned.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let (stop_tx, task) = {
            let mut control = self.control();
            if control.state == RunnerState::Stopped {
                return;
            }
            control.state = RunnerState::Stopped;
            (control.stop_tx.take(), control.task.take())
        };

        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
        drop(lock(&self.shared.watcher).take());
        self.shared.cancel_pending();

        if let Some(task) = task {
            if tokio::time::timeout(self.shared.settings.stop_grace, task)
                .await
                .is_err()
            {
                warn!(
                    folder_id = self.shared.folder.id,
                    "Run loop did not exit within grace period"
                );
            }
        }

        info!(folder_id = self.shared.folder.id, "Stopped watching folder");
    }
}

async fn run(
    shared: Arc<RunnerShared>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            received = events.recv() => match received {
                Some(Ok(event)) => shared.handle_event(event).await,
                Some(Err(error)) => shared.handle_watcher_error(error),
                // Watcher dropped
                None => break,
            },
        }
    }
    debug!(folder_id = shared.folder.id, "Run loop exited");
}

impl RunnerShared {
    async fn handle_event(self: &Arc<Self>, event: Event) {
        let Some(trigger) = classify(&event.kind) else {
            return;
        };

        for path in event.paths {
            if trigger == Trigger::Removed {
                lock(&self.watched).remove(&path);
                continue;
            }

            let media = is_watchable_media_file(&path);
            if !media && !self.folder.recursive {
                debug!(path = %path.display(), "Ignoring non-media path");
                continue;
            }

            let is_dir = tokio::fs::metadata(&path)
                .await
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false);
            if is_dir {
                if trigger == Trigger::Created && self.folder.recursive {
                    self.watch_new_directory(path).await;
                }
            } else if media {
                self.schedule_import(path);
            } else {
                debug!(path = %path.display(), "Ignoring non-media path");
            }
        }
    }

    fn handle_watcher_error(&self, error: notify::Error) {
        let vanished = match &error.kind {
            notify::ErrorKind::PathNotFound => true,
            notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        };
        if vanished {
            debug!(folder_id = self.folder.id, error = %error, "Watched path vanished");
            return;
        }

        let error = FolderWatchError::Watcher(error);
        warn!(folder_id = self.folder.id, error = %error, "Watcher reported an error");
        self.reporter.runtime_error(&error.to_string());
    }

    /// A directory appeared below a recursive folder. Files that landed in it
    /// before the watch was attached are scheduled as well.
    async fn watch_new_directory(self: &Arc<Self>, dir: PathBuf) {
        match self.watch_tree_blocking(dir.clone()).await {
            Ok(existing) => {
                debug!(path = %dir.display(), "Watching new directory");
                for path in existing {
                    self.schedule_import(path);
                }
            }
            Err(e) => {
                warn!(folder_id = self.folder.id, error = %e, "Failed to watch new directory");
                self.reporter.runtime_error(&e.to_string());
            }
        }
    }

    async fn watch_tree_blocking(self: &Arc<Self>, root: PathBuf) -> Result<Vec<PathBuf>, FolderWatchError> {
        let shared = Arc::clone(self);
        let walk_root = root.clone();
        tokio::task::spawn_blocking(move || shared.add_watch_tree(&walk_root))
            .await
            .map_err(|e| FolderWatchError::WatchSetup {
                path: root,
                source: notify::Error::generic(&format!("directory walk failed: {}", e)),
            })?
    }

    /// Watch `root` and, for recursive folders, every directory below it.
    ///
    /// Only a failure on `root` is returned. Subdirectories that cannot be
    /// watched are reported and not descended into. Returns the media files
    /// found during the walk.
    fn add_watch_tree(&self, root: &Path) -> Result<Vec<PathBuf>, FolderWatchError> {
        self.watch_directory(root)?;

        let mut media = Vec::new();
        if !self.folder.recursive {
            return Ok(media);
        }

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !entry.file_type().is_dir() || self.watch_subdirectory(entry.path()));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && is_watchable_media_file(entry.path()) {
                        media.push(entry.into_path());
                    }
                }
                Err(e) => self.report_walk_error(e),
            }
        }

        Ok(media)
    }

    fn watch_subdirectory(&self, dir: &Path) -> bool {
        match self.watch_directory(dir) {
            Ok(()) => true,
            Err(e) => {
                warn!(folder_id = self.folder.id, error = %e, "Failed to watch subdirectory");
                self.reporter.runtime_error(&e.to_string());
                false
            }
        }
    }

    /// Entries that vanish mid-walk are expected; anything else is recorded
    fn report_walk_error(&self, error: walkdir::Error) {
        let vanished = error
            .io_error()
            .map(|io| io.kind() == std::io::ErrorKind::NotFound)
            .unwrap_or(false);
        if vanished {
            debug!(error = %error, "Entry vanished during directory walk");
            return;
        }

        warn!(folder_id = self.folder.id, error = %error, "Error walking directory");
        self.reporter
            .runtime_error(&format!("directory walk error: {}", error));
    }

    fn watch_directory(&self, dir: &Path) -> Result<(), FolderWatchError> {
        let mut watcher = lock(&self.watcher);
        let Some(watcher) = watcher.as_mut() else {
            return Err(FolderWatchError::WatchSetup {
                path: dir.to_path_buf(),
                source: notify::Error::generic("watcher is closed"),
            });
        };

        let mut watched = lock(&self.watched);
        if watched.contains(dir) {
            return Ok(());
        }

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| FolderWatchError::WatchSetup {
                path: dir.to_path_buf(),
                source,
            })?;
        watched.insert(dir.to_path_buf());
        Ok(())
    }

    /// (Re)start the debounce timer for `path`, replacing any pending one
    fn schedule_import(self: &Arc<Self>, path: PathBuf) {
        let mut pending = lock(&self.pending);
        if pending.stopped {
            return;
        }

        pending.next_generation += 1;
        let generation = pending.next_generation;

        let shared = Arc::clone(self);
        let timer_path = path.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(shared.settings.debounce).await;
            shared.fire(timer_path, generation).await;
        });

        if let Some((_, previous)) = pending.timers.insert(path, (generation, timer.abort_handle())) {
            previous.abort();
        }
    }

    async fn fire(self: &Arc<Self>, path: PathBuf, generation: u64) {
        {
            let mut pending = lock(&self.pending);
            match pending.timers.get(&path) {
                Some((current, _)) if *current == generation => {
                    // From here on the task is an import, which stop leaves alone
                    pending.timers.remove(&path);
                }
                _ => return,
            }
            if pending.stopped {
                return;
            }
            if !pending.in_flight.insert(path.clone()) {
                pending.rearm.insert(path);
                return;
            }
        }

        self.process_candidate(&path).await;

        let rearm = {
            let mut pending = lock(&self.pending);
            pending.in_flight.remove(&path);
            pending.rearm.remove(&path) && !pending.stopped
        };
        if rearm {
            self.schedule_import(path);
        }
    }

    async fn process_candidate(&self, path: &Path) {
        let signature = match wait_for_stable_file(path, &self.settings).await {
            Ok(signature) => signature,
            Err(FolderWatchError::StabilizationNotFound(_)) => {
                debug!(path = %path.display(), "File vanished before it settled");
                return;
            }
            Err(e) => {
                warn!(folder_id = self.folder.id, error = %e, "File did not become importable");
                self.reporter.runtime_error(&e.to_string());
                return;
            }
        };

        let already_imported = lock(&self.pending).imported.get(path) == Some(&signature);
        if already_imported {
            debug!(path = %path.display(), "Signature already imported, skipping");
            return;
        }

        match self.importer.import_file(self.folder.user_id, path).await {
            Ok(outcome) => {
                lock(&self.pending)
                    .imported
                    .insert(path.to_path_buf(), signature);
                self.reporter.imported(path);

                if let AutoTranscription::Failed(reason) = &outcome.auto_transcription {
                    warn!(job_id = %outcome.job.id, reason = %reason, "Auto-transcription failed");
                    self.reporter.runtime_error(reason);
                }
            }
            Err(e) => {
                warn!(folder_id = self.folder.id, error = %e, "Import failed");
                self.reporter.runtime_error(&e.to_string());
            }
        }
    }

    fn cancel_pending(&self) {
        let mut pending = lock(&self.pending);
        pending.stopped = true;
        for (_, (_, timer)) in pending.timers.drain() {
            timer.abort();
        }
        pending.rearm.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobQueue;
    use crate::store::SqliteStore;
    use crate::watch::status::StatusBoard;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NullQueue;

    #[async_trait]
    impl JobQueue for NullQueue {
        async fn enqueue_job(&self, _job_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn settings(debounce: Duration) -> WatchSettings {
        WatchSettings {
            debounce,
            stability_interval: Duration::from_millis(20),
            stop_grace: Duration::from_millis(500),
            ..WatchSettings::default()
        }
    }

    fn runner_for(root: &Path, recursive: bool, settings: WatchSettings) -> (FolderRunner, SqliteStore, TempDir) {
        let store = SqliteStore::open_in_memory().unwrap();
        let uploads = TempDir::new().unwrap();
        let importer = Importer::new(
            uploads.path().to_path_buf(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(NullQueue),
            &settings,
        );
        let folder = WatchedFolder {
            id: 1,
            user_id: 1,
            path: root.to_path_buf(),
            recursive,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let runner = FolderRunner::new(
            folder,
            settings,
            Arc::new(importer),
            StatusReporter::new(1, StatusBoard::new()),
        );
        (runner, store, uploads)
    }

    #[test]
    fn test_classify_events() {
        use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};

        assert_eq!(classify(&EventKind::Create(CreateKind::File)), Some(Trigger::Created));
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(Trigger::Created)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Any))),
            Some(Trigger::Written)
        );
        assert_eq!(
            classify(&EventKind::Access(AccessKind::Close(AccessMode::Write))),
            Some(Trigger::Written)
        );
        assert_eq!(classify(&EventKind::Remove(RemoveKind::File)), Some(Trigger::Removed));
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            None
        );
        assert_eq!(classify(&EventKind::Access(AccessKind::Read)), None);
    }

    #[tokio::test]
    async fn test_start_and_stop_lifecycle() {
        let temp = TempDir::new().unwrap();
        let (runner, _store, _uploads) = runner_for(temp.path(), false, settings(Duration::from_millis(50)));

        assert_eq!(runner.state(), RunnerState::Created);
        runner.start().await.unwrap();
        assert_eq!(runner.state(), RunnerState::Watching);
        assert_eq!(runner.watched_directories(), vec![temp.path().to_path_buf()]);

        runner.stop().await;
        assert_eq!(runner.state(), RunnerState::Stopped);

        // Second stop is a no-op, restart is refused
        runner.stop().await;
        assert!(matches!(runner.start().await, Err(FolderWatchError::WatchSetup { .. })));
    }

    #[tokio::test]
    async fn test_recursive_start_watches_existing_subdirectories() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();
        std::fs::create_dir(temp.path().join("c")).unwrap();
        let (runner, _store, _uploads) = runner_for(temp.path(), true, settings(Duration::from_millis(50)));

        runner.start().await.unwrap();

        let mut expected = vec![
            temp.path().to_path_buf(),
            temp.path().join("a"),
            temp.path().join("a/b"),
            temp.path().join("c"),
        ];
        expected.sort();
        assert_eq!(runner.watched_directories(), expected);
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_missing_root_fails_setup() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone");
        let (runner, _store, _uploads) = runner_for(&missing, false, settings(Duration::from_millis(50)));

        let result = runner.start().await;

        assert!(matches!(result, Err(FolderWatchError::WatchSetup { .. })));
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert!(runner.watched_directories().is_empty());
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_timers() {
        let temp = TempDir::new().unwrap();
        let (runner, store, _uploads) = runner_for(temp.path(), false, settings(Duration::from_secs(30)));
        runner.start().await.unwrap();

        std::fs::write(temp.path().join("late.mp3"), b"audio").unwrap();
        for _ in 0..100 {
            if runner.pending_imports() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(runner.pending_imports() > 0);

        runner.stop().await;

        assert_eq!(runner.pending_imports(), 0);
        assert!(store.list_jobs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_named_like_media_is_never_scheduled() {
        use notify::event::{CreateKind, DataChange};

        let temp = TempDir::new().unwrap();
        let album = temp.path().join("album.mp3");
        std::fs::create_dir(&album).unwrap();
        let (runner, _store, _uploads) = runner_for(temp.path(), false, settings(Duration::from_secs(30)));

        for kind in [
            EventKind::Create(CreateKind::Folder),
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
        ] {
            runner.shared.handle_event(Event::new(kind).add_path(album.clone())).await;
        }
        assert_eq!(runner.pending_imports(), 0);

        let track = temp.path().join("track.mp3");
        std::fs::write(&track, b"audio").unwrap();
        runner
            .shared
            .handle_event(Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any))).add_path(track))
            .await;
        assert_eq!(runner.pending_imports(), 1);

        runner.stop().await;
        assert_eq!(runner.pending_imports(), 0);
    }

    #[tokio::test]
    async fn test_new_directory_tree_is_watched_and_scanned() {
        use notify::event::CreateKind;

        let temp = TempDir::new().unwrap();
        let (runner, _store, _uploads) = runner_for(temp.path(), true, settings(Duration::from_secs(30)));
        runner.start().await.unwrap();

        let nested = temp.path().join("2024");
        std::fs::create_dir_all(nested.join("q1")).unwrap();
        std::fs::write(nested.join("q1/kickoff.wav"), b"RIFF").unwrap();
        std::fs::write(nested.join("notes.txt"), b"text").unwrap();

        runner
            .shared
            .handle_event(Event::new(EventKind::Create(CreateKind::Folder)).add_path(nested.clone()))
            .await;

        let watched = runner.watched_directories();
        assert!(watched.contains(&nested));
        assert!(watched.contains(&nested.join("q1")));
        assert!(lock(&runner.shared.pending)
            .timers
            .contains_key(&nested.join("q1/kickoff.wav")));

        runner.stop().await;
    }
}
