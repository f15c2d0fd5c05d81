//! SQLite-backed implementation of the storage traits.
//!
//! One `rusqlite::Connection` behind a mutex serves every repository. The
//! queries are small and local, so they run inline on the calling task.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{FolderRepository, JobRepository, ProfileRepository, UserRepository};
use crate::domain::{
    FolderId, JobStatus, NewWatchedFolder, TranscriptionJob, TranscriptionParameters,
    TranscriptionProfile, User, UserId, WatchedFolder,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    auto_transcription_enabled INTEGER NOT NULL DEFAULT 0,
    default_profile_id TEXT
);

CREATE TABLE IF NOT EXISTS transcription_profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0,
    parameters TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS watched_folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    recursive INTEGER NOT NULL DEFAULT 1,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_watched_folders_user_path
    ON watched_folders (user_id, path);

CREATE TABLE IF NOT EXISTS transcription_jobs (
    id TEXT PRIMARY KEY,
    audio_path TEXT NOT NULL,
    status TEXT NOT NULL,
    title TEXT,
    parameters TEXT,
    diarization INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const FOLDER_COLUMNS: &str = "id, user_id, path, recursive, enabled, created_at, updated_at";
const JOB_COLUMNS: &str =
    "id, audio_path, status, title, parameters, diarization, created_at, updated_at";
const PROFILE_COLUMNS: &str = "id, name, is_default, parameters";

/// SQLite store for folders, jobs, users and profiles
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to apply database schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Management helpers (used by the CLI, not by the watch runtime)
    // ========================================================================

    /// Create a user
    pub fn create_user(&self, username: &str, auto_transcription_enabled: bool) -> Result<User> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (username, auto_transcription_enabled) VALUES (?1, ?2)",
            params![username, auto_transcription_enabled],
        )
        .with_context(|| format!("Failed to create user: {}", username))?;

        Ok(User {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            auto_transcription_enabled,
            default_profile_id: None,
        })
    }

    /// Update a user's auto-transcription settings
    pub fn set_auto_transcription(
        &self,
        user_id: UserId,
        enabled: bool,
        default_profile_id: Option<&str>,
    ) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE users SET auto_transcription_enabled = ?1, default_profile_id = ?2 WHERE id = ?3",
                params![enabled, default_profile_id, user_id],
            )
            .context("Failed to update user")?;

        if changed == 0 {
            anyhow::bail!("User not found: {}", user_id);
        }
        Ok(())
    }

    /// Create a profile. Flagging it as default clears the flag elsewhere.
    pub fn create_profile(
        &self,
        name: &str,
        parameters: TranscriptionParameters,
        is_default: bool,
    ) -> Result<TranscriptionProfile> {
        let profile = TranscriptionProfile {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            is_default,
            parameters,
        };
        let parameters_json =
            serde_json::to_string(&profile.parameters).context("Failed to serialize parameters")?;

        let mut conn = self.conn();
        let tx = conn.transaction().context("Failed to start transaction")?;
        if is_default {
            tx.execute("UPDATE transcription_profiles SET is_default = 0", [])?;
        }
        tx.execute(
            "INSERT INTO transcription_profiles (id, name, is_default, parameters) VALUES (?1, ?2, ?3, ?4)",
            params![profile.id, profile.name, profile.is_default, parameters_json],
        )
        .with_context(|| format!("Failed to create profile: {}", name))?;
        tx.commit().context("Failed to commit profile")?;

        Ok(profile)
    }

    /// Most recent jobs first
    pub fn list_jobs(&self, limit: usize) -> Result<Vec<TranscriptionJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transcription_jobs ORDER BY created_at DESC LIMIT ?1",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![limit as i64], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list jobs")?;
        Ok(jobs)
    }
}

#[async_trait]
impl FolderRepository for SqliteStore {
    async fn create(&self, folder: NewWatchedFolder) -> Result<WatchedFolder> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO watched_folders (user_id, path, recursive, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                folder.user_id,
                folder.path.to_string_lossy(),
                folder.recursive,
                folder.enabled,
                now.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to create watched folder: {}", folder.path.display()))?;

        Ok(WatchedFolder {
            id: conn.last_insert_rowid(),
            user_id: folder.user_id,
            path: folder.path,
            recursive: folder.recursive,
            enabled: folder.enabled,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update(&self, folder: &WatchedFolder) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE watched_folders SET recursive = ?1, enabled = ?2, updated_at = ?3 WHERE id = ?4",
                params![folder.recursive, folder.enabled, Utc::now().to_rfc3339(), folder.id],
            )
            .with_context(|| format!("Failed to update watched folder {}", folder.id))?;
        Ok(())
    }

    async fn delete(&self, id: FolderId) -> Result<()> {
        self.conn()
            .execute("DELETE FROM watched_folders WHERE id = ?1", params![id])
            .with_context(|| format!("Failed to delete watched folder {}", id))?;
        Ok(())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<WatchedFolder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM watched_folders WHERE user_id = ?1 ORDER BY path ASC",
            FOLDER_COLUMNS
        ))?;
        let folders = stmt
            .query_map(params![user_id], folder_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list watched folders")?;
        Ok(folders)
    }

    async fn find_enabled(&self) -> Result<Vec<WatchedFolder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM watched_folders WHERE enabled = 1 ORDER BY id ASC",
            FOLDER_COLUMNS
        ))?;
        let folders = stmt
            .query_map([], folder_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list enabled folders")?;
        Ok(folders)
    }

    async fn find_by_user_and_path(
        &self,
        user_id: UserId,
        path: &str,
    ) -> Result<Option<WatchedFolder>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {} FROM watched_folders WHERE user_id = ?1 AND path = ?2",
                    FOLDER_COLUMNS
                ),
                params![user_id, path],
                folder_from_row,
            )
            .optional()
            .context("Failed to look up watched folder by path")
    }

    async fn find_by_user_and_id(
        &self,
        user_id: UserId,
        id: FolderId,
    ) -> Result<Option<WatchedFolder>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {} FROM watched_folders WHERE id = ?1 AND user_id = ?2",
                    FOLDER_COLUMNS
                ),
                params![id, user_id],
                folder_from_row,
            )
            .optional()
            .context("Failed to look up watched folder")
    }
}

#[async_trait]
impl JobRepository for SqliteStore {
    async fn create(&self, job: &TranscriptionJob) -> Result<()> {
        let parameters = encode_parameters(job.parameters.as_ref())?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO transcription_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    JOB_COLUMNS
                ),
                params![
                    job.id,
                    job.audio_path.to_string_lossy(),
                    job.status.as_str(),
                    job.title,
                    parameters,
                    job.diarization,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to create job {}", job.id))?;
        Ok(())
    }

    async fn update(&self, job: &TranscriptionJob) -> Result<()> {
        let parameters = encode_parameters(job.parameters.as_ref())?;
        let changed = self
            .conn()
            .execute(
                "UPDATE transcription_jobs
                 SET status = ?1, parameters = ?2, diarization = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    job.status.as_str(),
                    parameters,
                    job.diarization,
                    Utc::now().to_rfc3339(),
                    job.id,
                ],
            )
            .with_context(|| format!("Failed to update job {}", job.id))?;

        if changed == 0 {
            anyhow::bail!("Job not found: {}", job.id);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TranscriptionJob>> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM transcription_jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                job_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load job {}", id))
    }
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        self.conn()
            .query_row(
                "SELECT id, username, auto_transcription_enabled, default_profile_id FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        auto_transcription_enabled: row.get(2)?,
                        default_profile_id: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to load user {}", id))
    }
}

#[async_trait]
impl ProfileRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<TranscriptionProfile>> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM transcription_profiles WHERE id = ?1", PROFILE_COLUMNS),
                params![id],
                profile_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load profile {}", id))
    }

    async fn find_default(&self) -> Result<Option<TranscriptionProfile>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {} FROM transcription_profiles WHERE is_default = 1 LIMIT 1",
                    PROFILE_COLUMNS
                ),
                [],
                profile_from_row,
            )
            .optional()
            .context("Failed to load default profile")
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<TranscriptionProfile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transcription_profiles ORDER BY name ASC LIMIT ?1 OFFSET ?2",
            PROFILE_COLUMNS
        ))?;
        let profiles = stmt
            .query_map(params![limit as i64, offset as i64], profile_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list profiles")?;
        Ok(profiles)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<WatchedFolder> {
    Ok(WatchedFolder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        recursive: row.get(3)?,
        enabled: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
        updated_at: timestamp_column(row, 6)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<TranscriptionJob> {
    let status: String = row.get(2)?;
    let status = JobStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown job status: {}", status).into(),
        )
    })?;

    let parameters = match row.get::<_, Option<String>>(4)? {
        Some(json) => Some(json_column(&json, 4)?),
        None => None,
    };

    Ok(TranscriptionJob {
        id: row.get(0)?,
        audio_path: PathBuf::from(row.get::<_, String>(1)?),
        status,
        title: row.get(3)?,
        parameters,
        diarization: row.get(5)?,
        created_at: timestamp_column(row, 6)?,
        updated_at: timestamp_column(row, 7)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<TranscriptionProfile> {
    let parameters: String = row.get(3)?;
    Ok(TranscriptionProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        is_default: row.get(2)?,
        parameters: json_column(&parameters, 3)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: serde::de::DeserializeOwned>(raw: &str, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn encode_parameters(parameters: Option<&TranscriptionParameters>) -> Result<Option<String>> {
    parameters
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize parameters")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_folder(user_id: UserId, path: &str) -> NewWatchedFolder {
        NewWatchedFolder {
            user_id,
            path: PathBuf::from(path),
            recursive: true,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_folder_crud() {
        let store = SqliteStore::open_in_memory().unwrap();

        let created = FolderRepository::create(&store, new_folder(1, "/data/b")).await.unwrap();
        FolderRepository::create(&store, new_folder(1, "/data/a")).await.unwrap();
        FolderRepository::create(&store, new_folder(2, "/data/a")).await.unwrap();

        let mine = store.find_by_user(1).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].path, PathBuf::from("/data/a"));

        let mut folder = store.find_by_user_and_id(1, created.id).await.unwrap().unwrap();
        assert_eq!(folder, created);

        folder.enabled = false;
        FolderRepository::update(&store, &folder).await.unwrap();
        let enabled = store.find_enabled().await.unwrap();
        assert_eq!(enabled.len(), 2);
        assert!(enabled.iter().all(|f| f.id != created.id));

        // Foreign ids are invisible
        assert!(store.find_by_user_and_id(2, created.id).await.unwrap().is_none());

        FolderRepository::delete(&store, created.id).await.unwrap();
        assert!(store.find_by_user_and_id(1, created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_owner_path_is_unique() {
        let store = SqliteStore::open_in_memory().unwrap();

        FolderRepository::create(&store, new_folder(1, "/data/a")).await.unwrap();
        let duplicate = FolderRepository::create(&store, new_folder(1, "/data/a")).await;
        assert!(duplicate.is_err());

        let found = store.find_by_user_and_path(1, "/data/a").await.unwrap();
        assert!(found.is_some());
        assert!(store.find_by_user_and_path(3, "/data/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_round_trip_with_parameters() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut job = TranscriptionJob::uploaded(
            Uuid::new_v4().to_string(),
            PathBuf::from("/uploads/x.wav"),
            Some("x.wav".to_string()),
        );
        JobRepository::create(&store, &job).await.unwrap();

        job.status = JobStatus::Pending;
        job.diarization = true;
        job.parameters = Some(TranscriptionParameters {
            model: "small".to_string(),
            diarize: true,
            ..Default::default()
        });
        JobRepository::update(&store, &job).await.unwrap();

        let loaded = JobRepository::find_by_id(&store, &job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert!(loaded.diarization);
        assert_eq!(loaded.parameters.unwrap().model, "small");
        assert_eq!(store.list_jobs(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_default_profile_is_exclusive() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first = store
            .create_profile("fast", TranscriptionParameters::default(), true)
            .unwrap();
        let second = store
            .create_profile("accurate", TranscriptionParameters::default(), true)
            .unwrap();

        let default = store.find_default().await.unwrap().unwrap();
        assert_eq!(default.id, second.id);

        let listed = ProfileRepository::list(&store, 0, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "accurate");
        assert!(!listed.iter().find(|p| p.id == first.id).unwrap().is_default);
    }

    #[tokio::test]
    async fn test_user_auto_transcription_settings() {
        let store = SqliteStore::open_in_memory().unwrap();

        let user = store.create_user("ada", false).unwrap();
        store.set_auto_transcription(user.id, true, Some("profile-1")).unwrap();

        let loaded = UserRepository::find_by_id(&store, user.id).await.unwrap().unwrap();
        assert!(loaded.auto_transcription_enabled);
        assert_eq!(loaded.default_profile_id.as_deref(), Some("profile-1"));

        assert!(store.set_auto_transcription(999, true, None).is_err());
    }
}
