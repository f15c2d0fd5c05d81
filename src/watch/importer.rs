//! Copies stabilized media into managed storage and registers jobs.
//!
//! An import is: copy the file under a fresh job id, persist an `uploaded`
//! job, then optionally hand the job to the transcription queue using the
//! owner's profile. Imports across all folders share one optional semaphore.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::fs::{self, File};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::media::{is_watchable_media_file, normalized_extension};
use super::FolderWatchError;
use crate::config::WatchSettings;
use crate::domain::{JobStatus, TranscriptionJob, TranscriptionProfile, User, UserId};
use crate::queue::JobQueue;
use crate::store::{JobRepository, ProfileRepository, UserRepository};

/// What happened after the job was stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoTranscription {
    /// Owner unknown or auto-transcription switched off
    Disabled,

    /// Auto-transcription is on but no profile exists
    NoProfile,

    /// Job is pending in the queue with the profile's parameters
    Queued { profile_id: String },

    /// Job stayed `uploaded`; the reason is reported as a runtime error
    Failed(String),
}

/// Result of a successful import
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub job: TranscriptionJob,
    pub auto_transcription: AutoTranscription,
}

/// Shared import pipeline used by every folder runner
pub struct Importer {
    upload_dir: PathBuf,
    jobs: Arc<dyn JobRepository>,
    users: Arc<dyn UserRepository>,
    profiles: Arc<dyn ProfileRepository>,
    queue: Arc<dyn JobQueue>,
    permits: Option<Arc<Semaphore>>,
    import_timeout: Duration,
}

impl Importer {
    pub fn new(
        upload_dir: PathBuf,
        jobs: Arc<dyn JobRepository>,
        users: Arc<dyn UserRepository>,
        profiles: Arc<dyn ProfileRepository>,
        queue: Arc<dyn JobQueue>,
        settings: &WatchSettings,
    ) -> Self {
        let permits = match settings.max_concurrent_imports {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        Self {
            upload_dir,
            jobs,
            users,
            profiles,
            queue,
            permits,
            import_timeout: settings.import_timeout,
        }
    }

    /// Import `source` on behalf of `user_id`.
    ///
    /// Waits for an import slot first. Copy and job creation share one
    /// import timeout, the queue hand-off gets its own. Once the job row
    /// exists the import counts as done: a timeout after that point keeps
    /// the copy, and a stalled hand-off reverts the job to `uploaded`.
    pub async fn import_file(
        &self,
        user_id: UserId,
        source: &Path,
    ) -> Result<ImportOutcome, FolderWatchError> {
        let _permit = match &self.permits {
            Some(permits) => Some(
                Arc::clone(permits)
                    .acquire_owned()
                    .await
                    .map_err(|e| FolderWatchError::import(source, e.into()))?,
            ),
            None => None,
        };

        let job_id = Uuid::new_v4().to_string();
        let dest = self
            .upload_dir
            .join(format!("{}{}", job_id, normalized_extension(source)));

        let attempt =
            tokio::time::timeout(self.import_timeout, self.store_copy(source, &job_id, &dest)).await;
        let mut job = match attempt {
            Ok(result) => result.map_err(|e| FolderWatchError::import(source, e))?,
            Err(_) => self.recover_timed_out(source, &job_id, &dest).await?,
        };

        let auto_transcription = self.auto_transcribe(user_id, &mut job).await;
        Ok(ImportOutcome {
            job,
            auto_transcription,
        })
    }

    /// Copy `source` to `dest` and persist it as an `uploaded` job
    async fn store_copy(&self, source: &Path, job_id: &str, dest: &Path) -> Result<TranscriptionJob> {
        let metadata = fs::metadata(source)
            .await
            .context("Failed to access source file")?;
        if metadata.is_dir() {
            anyhow::bail!("Source path is a directory");
        }
        if !is_watchable_media_file(source) {
            anyhow::bail!("Unsupported file type");
        }

        fs::create_dir_all(&self.upload_dir).await.with_context(|| {
            format!(
                "Failed to create upload directory: {}",
                self.upload_dir.display()
            )
        })?;

        if let Err(e) = copy_file(source, dest).await {
            let _ = fs::remove_file(dest).await;
            return Err(e.context("Failed to copy file for import"));
        }

        let title = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let job = TranscriptionJob::uploaded(job_id.to_string(), dest.to_path_buf(), title);

        if let Err(e) = self.jobs.create(&job).await {
            let _ = fs::remove_file(dest).await;
            return Err(e.context("Failed to create transcription job"));
        }

        info!(job_id = %job.id, source = %source.display(), "Imported media file");
        Ok(job)
    }

    /// The copy/persist step ran out of time. The job row may still have
    /// landed just before the deadline; only without one is the copy removed.
    async fn recover_timed_out(
        &self,
        source: &Path,
        job_id: &str,
        dest: &Path,
    ) -> Result<TranscriptionJob, FolderWatchError> {
        let timed_out = || {
            FolderWatchError::import(
                source,
                anyhow!("import timed out after {:?}", self.import_timeout),
            )
        };

        match self.jobs.find_by_id(job_id).await {
            Ok(Some(job)) => {
                warn!(job_id, "Import hit its timeout after the job was stored");
                Ok(job)
            }
            Ok(None) => {
                let _ = fs::remove_file(dest).await;
                Err(timed_out())
            }
            Err(e) => {
                warn!(job_id, error = %e, "Could not check for job after timeout, keeping copy");
                Err(timed_out())
            }
        }
    }

    /// Bounded queue hand-off. A timeout can interrupt it between the
    /// status flip and the enqueue, so the job is put back to `uploaded`.
    async fn auto_transcribe(&self, user_id: UserId, job: &mut TranscriptionJob) -> AutoTranscription {
        let attempt = tokio::time::timeout(
            self.import_timeout,
            self.maybe_queue_auto_transcription(user_id, job),
        )
        .await;

        match attempt {
            Ok(outcome) => outcome,
            Err(_) => {
                self.revert_to_uploaded(job).await;
                AutoTranscription::Failed(format!(
                    "queueing job {} timed out after {:?}",
                    job.id, self.import_timeout
                ))
            }
        }
    }

    /// Queue the job with the owner's profile when auto-transcription is on.
    ///
    /// Any failure after the status flip reverts the job to `uploaded`.
    async fn maybe_queue_auto_transcription(
        &self,
        user_id: UserId,
        job: &mut TranscriptionJob,
    ) -> AutoTranscription {
        let user = match self.users.find_by_id(user_id).await {
            Ok(Some(user)) if user.auto_transcription_enabled => user,
            Ok(_) => return AutoTranscription::Disabled,
            Err(e) => {
                warn!(user_id, error = %e, "Could not load user for auto-transcription");
                return AutoTranscription::Disabled;
            }
        };

        let Some(profile) = self.select_profile(&user).await else {
            debug!(user_id, job_id = %job.id, "No transcription profile available");
            return AutoTranscription::NoProfile;
        };

        job.parameters = Some(profile.parameters.clone());
        job.diarization = profile.parameters.diarize;
        job.status = JobStatus::Pending;
        job.updated_at = Utc::now();

        if let Err(e) = self.jobs.update(job).await {
            self.revert_to_uploaded(job).await;
            return AutoTranscription::Failed(format!(
                "failed to mark job {} pending: {:#}",
                job.id, e
            ));
        }

        if let Err(e) = self.queue.enqueue_job(&job.id).await {
            self.revert_to_uploaded(job).await;
            return AutoTranscription::Failed(format!(
                "failed to enqueue job {}: {:#}",
                job.id, e
            ));
        }

        info!(job_id = %job.id, profile = %profile.name, "Queued job for transcription");
        AutoTranscription::Queued {
            profile_id: profile.id,
        }
    }

    /// User default, then system default, then the first profile by name.
    /// Lookup errors fall through to the next candidate.
    async fn select_profile(&self, user: &User) -> Option<TranscriptionProfile> {
        if let Some(profile_id) = &user.default_profile_id {
            match self.profiles.find_by_id(profile_id).await {
                Ok(Some(profile)) => return Some(profile),
                Ok(None) => debug!(profile_id = %profile_id, "User default profile is missing"),
                Err(e) => warn!(profile_id = %profile_id, error = %e, "Profile lookup failed"),
            }
        }

        match self.profiles.find_default().await {
            Ok(Some(profile)) => return Some(profile),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Default profile lookup failed"),
        }

        match self.profiles.list(0, 1).await {
            Ok(profiles) => profiles.into_iter().next(),
            Err(e) => {
                warn!(error = %e, "Profile listing failed");
                None
            }
        }
    }

    async fn revert_to_uploaded(&self, job: &mut TranscriptionJob) {
        job.status = JobStatus::Uploaded;
        job.updated_at = Utc::now();
        if let Err(e) = self.jobs.update(job).await {
            warn!(job_id = %job.id, error = %e, "Failed to revert job to uploaded");
        }
    }
}

async fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    let mut reader = File::open(source)
        .await
        .with_context(|| format!("Failed to open {}", source.display()))?;
    let mut writer = File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.sync_all().await?;
    Ok(())
}
