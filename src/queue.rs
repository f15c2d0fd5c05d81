//! JSONL-based transcription queue.
//!
//! Append-only JSONL with state derived from replay: every state change is a
//! new line, nothing is rewritten in place. The watch runtime only needs
//! [`JobQueue::enqueue_job`]; claiming entries is for the external
//! transcription executor.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Accepts job ids for asynchronous transcription
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hand a job to the queue. May fail, e.g. when the queue is full.
    async fn enqueue_job(&self, job_id: &str) -> Result<()>;
}

/// Errors that can occur with the transcription queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is full ({capacity} pending jobs)")]
    QueueFull { capacity: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An event in the queue log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The job this event refers to
    pub job_id: String,

    /// Type of queue event
    pub event_type: QueueEventType,
}

/// Types of queue events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    /// Job added to the queue
    Enqueued,

    /// Job picked up by an executor
    Claimed,
}

/// State of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Claimed,
}

/// A queue entry with current state (derived from replaying events)
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub job_id: String,
    pub status: EntryStatus,
    pub enqueued_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// JSONL-based transcription queue
pub struct TranscriptionQueue {
    /// Path to the queue JSONL file
    queue_path: PathBuf,

    /// Refuse new entries beyond this many pending ones
    max_pending: Option<usize>,

    /// Serializes replay-then-append sequences within this process
    write_lock: Mutex<()>,
}

impl TranscriptionQueue {
    /// Create an unbounded queue backed by `queue_path`
    pub fn new(queue_path: PathBuf) -> Self {
        Self {
            queue_path,
            max_pending: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a queue that rejects work once `max_pending` jobs are waiting
    pub fn with_capacity(queue_path: PathBuf, max_pending: usize) -> Self {
        Self {
            max_pending: Some(max_pending),
            ..Self::new(queue_path)
        }
    }

    /// Open the queue at its configured location, creating the directory
    pub async fn open_default() -> Result<Self> {
        let config = crate::config::config()?;
        let path = config.queue_path.clone();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Ok(match config.queue_max_pending {
            Some(capacity) => Self::with_capacity(path, capacity),
            None => Self::new(path),
        })
    }

    /// Append an event to the queue log
    async fn append_event(&self, event: &QueueEvent) -> Result<(), QueueError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.queue_path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events to build current state
    pub async fn replay(&self) -> Result<HashMap<String, QueueEntry>, QueueError> {
        let mut entries: HashMap<String, QueueEntry> = HashMap::new();

        if !fs::try_exists(&self.queue_path).await? {
            return Ok(entries);
        }

        let file = File::open(&self.queue_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let event: QueueEvent = serde_json::from_str(&line)?;
            Self::apply_event(&mut entries, event);
        }

        Ok(entries)
    }

    /// Apply a single event to the state
    fn apply_event(entries: &mut HashMap<String, QueueEntry>, event: QueueEvent) {
        match event.event_type {
            QueueEventType::Enqueued => {
                entries.insert(
                    event.job_id.clone(),
                    QueueEntry {
                        job_id: event.job_id,
                        status: EntryStatus::Pending,
                        enqueued_at: event.timestamp,
                        claimed_at: None,
                    },
                );
            }
            QueueEventType::Claimed => {
                if let Some(entry) = entries.get_mut(&event.job_id) {
                    entry.status = EntryStatus::Claimed;
                    entry.claimed_at = Some(event.timestamp);
                }
            }
        }
    }

    /// Enqueue a job (idempotent - an already known job is left untouched)
    pub async fn enqueue(&self, job_id: &str) -> Result<EnqueueResult, QueueError> {
        let _guard = self.write_lock.lock().await;

        let entries = self.replay().await?;
        if let Some(existing) = entries.get(job_id) {
            return Ok(match existing.status {
                EntryStatus::Pending => EnqueueResult::AlreadyQueued,
                EntryStatus::Claimed => EnqueueResult::AlreadyClaimed,
            });
        }

        if let Some(capacity) = self.max_pending {
            let pending = entries
                .values()
                .filter(|e| e.status == EntryStatus::Pending)
                .count();
            if pending >= capacity {
                return Err(QueueError::QueueFull { capacity });
            }
        }

        let event = QueueEvent {
            timestamp: Utc::now(),
            job_id: job_id.to_string(),
            event_type: QueueEventType::Enqueued,
        };
        self.append_event(&event).await?;

        Ok(EnqueueResult::Queued)
    }

    /// Claim the oldest pending entry for execution
    pub async fn claim_next(&self) -> Result<Option<QueueEntry>, QueueError> {
        let _guard = self.write_lock.lock().await;

        let Some(mut entry) = Self::sorted_pending(self.replay().await?).into_iter().next() else {
            return Ok(None);
        };

        let event = QueueEvent {
            timestamp: Utc::now(),
            job_id: entry.job_id.clone(),
            event_type: QueueEventType::Claimed,
        };
        self.append_event(&event).await?;

        entry.status = EntryStatus::Claimed;
        entry.claimed_at = Some(event.timestamp);
        Ok(Some(entry))
    }

    /// All pending entries, oldest first
    pub async fn pending(&self) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(Self::sorted_pending(self.replay().await?))
    }

    fn sorted_pending(entries: HashMap<String, QueueEntry>) -> Vec<QueueEntry> {
        let mut pending: Vec<QueueEntry> = entries
            .into_values()
            .filter(|entry| entry.status == EntryStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        pending
    }

    /// Get queue status summary
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let entries = self.replay().await?;

        let mut status = QueueStatus::default();
        for entry in entries.values() {
            match entry.status {
                EntryStatus::Pending => status.pending += 1,
                EntryStatus::Claimed => status.claimed += 1,
            }
        }

        Ok(status)
    }

    /// Get a specific entry by job id
    pub async fn get(&self, job_id: &str) -> Result<Option<QueueEntry>, QueueError> {
        let entries = self.replay().await?;
        Ok(entries.get(job_id).cloned())
    }
}

#[async_trait]
impl JobQueue for TranscriptionQueue {
    async fn enqueue_job(&self, job_id: &str) -> Result<()> {
        self.enqueue(job_id).await?;
        Ok(())
    }
}

/// Result of enqueueing a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Newly queued
    Queued,

    /// Already queued and waiting
    AlreadyQueued,

    /// Already picked up by an executor
    AlreadyClaimed,
}

impl EnqueueResult {
    /// Check if this was a new enqueue
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Queue status summary
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub claimed: usize,
}

impl QueueStatus {
    /// Total entries in queue
    pub fn total(&self) -> usize {
        self.pending + self.claimed
    }
}
