//! Debounce-by-polling.
//!
//! A [`QuiescenceDetector`] repeatedly samples a probe and reports success
//! once the sample has stayed equal for a number of consecutive polls. The
//! file flavour, [`wait_for_stable_file`], samples size and mtime to decide
//! that a file has finished being written.

use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::FolderWatchError;
use crate::config::WatchSettings;

/// Polls a probe until its value stops changing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuiescenceDetector {
    /// Delay between polls
    pub interval: Duration,

    /// Consecutive unchanged polls required
    pub required_matches: u32,

    /// Polls before giving up
    pub max_attempts: u32,
}

/// Outcome of a quiescence wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quiescence<T> {
    /// The sample settled and was accepted
    Settled(T),

    /// `max_attempts` polls passed without settling
    TimedOut,
}

impl QuiescenceDetector {
    pub fn new(interval: Duration, required_matches: u32, max_attempts: u32) -> Self {
        Self {
            interval,
            required_matches,
            max_attempts,
        }
    }

    /// Poll `probe` until `required_matches` consecutive samples equal their
    /// predecessor and `accept` agrees with the latest one.
    ///
    /// A probe error aborts the wait immediately.
    pub async fn wait_for<T, E, F, Fut>(
        &self,
        mut probe: F,
        accept: impl Fn(&T) -> bool,
    ) -> Result<Quiescence<T>, E>
    where
        T: PartialEq,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut previous: Option<T> = None;
        let mut matches = 0u32;

        for _ in 0..self.max_attempts {
            let sample = probe().await?;

            if previous.as_ref() == Some(&sample) {
                matches += 1;
            } else {
                matches = 0;
            }

            if matches >= self.required_matches && accept(&sample) {
                return Ok(Quiescence::Settled(sample));
            }

            previous = Some(sample);
            tokio::time::sleep(self.interval).await;
        }

        Ok(Quiescence::TimedOut)
    }
}

/// Size and mtime of a file, used to recognise content that was already imported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSignature {
    pub size: u64,

    /// Modification time in nanoseconds since the Unix epoch
    pub modified_nanos: i128,
}

impl FileSignature {
    fn from_metadata(metadata: &std::fs::Metadata) -> std::io::Result<Self> {
        let modified = metadata.modified()?;
        Ok(Self {
            size: metadata.len(),
            modified_nanos: system_time_nanos(modified),
        })
    }
}

fn system_time_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i128,
        Err(before) => -(before.duration().as_nanos() as i128),
    }
}

/// Detector parameters for file stability: the required matches plus two
/// spare polls.
pub fn file_stability_detector(settings: &WatchSettings) -> QuiescenceDetector {
    QuiescenceDetector::new(
        settings.stability_interval,
        settings.stability_checks,
        settings.stability_checks + 2,
    )
}

enum ProbeError {
    NotFound,
    Directory,
    Io(std::io::Error),
}

/// Wait until `path` stops changing and return its signature
pub async fn wait_for_stable_file(
    path: &Path,
    settings: &WatchSettings,
) -> Result<FileSignature, FolderWatchError> {
    let detector = file_stability_detector(settings);
    let min_bytes = settings.min_file_bytes;

    let outcome = detector
        .wait_for(
            || async move {
                let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
                    ErrorKind::NotFound => ProbeError::NotFound,
                    _ => ProbeError::Io(e),
                })?;
                if metadata.is_dir() {
                    return Err(ProbeError::Directory);
                }
                FileSignature::from_metadata(&metadata).map_err(ProbeError::Io)
            },
            |signature| signature.size >= min_bytes,
        )
        .await;

    match outcome {
        Ok(Quiescence::Settled(signature)) => Ok(signature),
        Ok(Quiescence::TimedOut) => Err(FolderWatchError::StabilizationTimeout(path.to_path_buf())),
        Err(ProbeError::NotFound) => Err(FolderWatchError::StabilizationNotFound(path.to_path_buf())),
        Err(ProbeError::Directory) => Err(FolderWatchError::import(
            path,
            anyhow::anyhow!("cannot import a directory"),
        )),
        Err(ProbeError::Io(e)) => Err(FolderWatchError::import(path, e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;
    use std::io::Write;
    use tempfile::TempDir;

    fn fast_settings() -> WatchSettings {
        WatchSettings {
            stability_interval: Duration::from_millis(20),
            ..WatchSettings::default()
        }
    }

    #[tokio::test]
    async fn test_settles_after_required_matches() {
        let detector = QuiescenceDetector::new(Duration::from_millis(1), 3, 5);
        let polls = Cell::new(0u32);

        let outcome = detector
            .wait_for(
                || {
                    polls.set(polls.get() + 1);
                    async { Ok::<_, Infallible>(42) }
                },
                |_| true,
            )
            .await
            .unwrap();

        assert_eq!(outcome, Quiescence::Settled(42));
        // First poll only establishes the baseline
        assert_eq!(polls.get(), 4);
    }

    #[tokio::test]
    async fn test_changing_value_times_out() {
        let detector = QuiescenceDetector::new(Duration::from_millis(1), 3, 5);
        let counter = Cell::new(0u32);

        let outcome = detector
            .wait_for(
                || {
                    counter.set(counter.get() + 1);
                    let value = counter.get();
                    async move { Ok::<_, Infallible>(value) }
                },
                |_| true,
            )
            .await
            .unwrap();

        assert_eq!(outcome, Quiescence::TimedOut);
        assert_eq!(counter.get(), 5);
    }

    #[tokio::test]
    async fn test_rejected_sample_keeps_polling() {
        let detector = QuiescenceDetector::new(Duration::from_millis(1), 1, 4);

        let outcome = detector
            .wait_for(|| async { Ok::<_, Infallible>(0u64) }, |size| *size >= 1)
            .await
            .unwrap();

        assert_eq!(outcome, Quiescence::TimedOut);
    }

    #[tokio::test]
    async fn test_probe_error_aborts() {
        let detector = QuiescenceDetector::new(Duration::from_millis(1), 3, 5);

        let result: Result<Quiescence<u8>, &str> =
            detector.wait_for(|| async { Err("gone") }, |_| true).await;

        assert_eq!(result, Err("gone"));
    }

    #[tokio::test]
    async fn test_stable_file_signature() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memo.m4a");
        std::fs::write(&path, b"finished recording").unwrap();

        let signature = wait_for_stable_file(&path, &fast_settings()).await.unwrap();

        assert_eq!(signature.size, 18);
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(signature, FileSignature::from_metadata(&metadata).unwrap());
    }

    #[tokio::test]
    async fn test_empty_file_never_stabilizes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.wav");
        std::fs::write(&path, b"").unwrap();

        let result = wait_for_stable_file(&path, &fast_settings()).await;

        assert!(matches!(result, Err(FolderWatchError::StabilizationTimeout(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("renamed-away.mp3");

        let result = wait_for_stable_file(&path, &fast_settings()).await;

        assert!(matches!(result, Err(FolderWatchError::StabilizationNotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("album.mp3");
        std::fs::create_dir(&path).unwrap();

        let result = wait_for_stable_file(&path, &fast_settings()).await;

        assert!(matches!(result, Err(FolderWatchError::Import { .. })));
    }

    #[tokio::test]
    async fn test_growing_file_times_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("download.mp4");
        std::fs::write(&path, b"start").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..40 {
                let mut file = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .unwrap();
                file.write_all(b"more bytes").unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let result = wait_for_stable_file(&path, &fast_settings()).await;
        writer.abort();

        assert!(matches!(result, Err(FolderWatchError::StabilizationTimeout(_))));
    }
}
