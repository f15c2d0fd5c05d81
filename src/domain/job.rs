//! Transcription jobs created from imported files.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::TranscriptionParameters;

/// A transcription job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionJob {
    /// Unique identifier (UUID v4)
    pub id: String,

    /// Copy of the media file inside managed storage
    pub audio_path: PathBuf,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Display title (original file name for imports)
    pub title: Option<String>,

    /// Parameters copied from a transcription profile
    pub parameters: Option<TranscriptionParameters>,

    /// Whether speaker diarization was requested
    pub diarization: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TranscriptionJob {
    /// Create a freshly uploaded job
    pub fn uploaded(id: String, audio_path: PathBuf, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            audio_path,
            status: JobStatus::Uploaded,
            title,
            parameters: None,
            diarization: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle status of a transcription job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// File stored, waiting for a user decision
    Uploaded,

    /// Handed to the queue
    Pending,

    /// Picked up by the transcription executor
    Processing,

    /// Transcription finished
    Completed,

    /// Transcription failed
    Failed,
}

impl JobStatus {
    /// Stable string form used by storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploaded" => Some(Self::Uploaded),
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Uploaded
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uploaded_job_defaults() {
        let job = TranscriptionJob::uploaded(
            "abc".to_string(),
            PathBuf::from("/uploads/abc.mp3"),
            Some("memo.mp3".to_string()),
        );

        assert_eq!(job.status, JobStatus::Uploaded);
        assert!(job.parameters.is_none());
        assert!(!job.diarization);
    }

    #[test]
    fn test_status_string_form() {
        for status in [
            JobStatus::Uploaded,
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);

        let json = serde_json::to_string(&JobStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }
}
