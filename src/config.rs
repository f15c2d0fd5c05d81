//! Configuration for mediawatch.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MEDIAWATCH_HOME, MEDIAWATCH_UPLOAD_DIR, MEDIAWATCH_DATABASE)
//! 2. Config file (.mediawatch/config.yaml)
//! 3. Defaults (~/.mediawatch)
//!
//! Config file discovery:
//! - Searches current directory and parents for .mediawatch/config.yaml
//! - `home` is relative to the .mediawatch/ directory, other paths to `home`

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub watch: Option<WatchConfig>,
    #[serde(default)]
    pub queue: Option<QueueConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .mediawatch/)
    pub home: Option<String>,
    /// Managed upload directory (relative to home)
    pub upload_dir: Option<String>,
    /// SQLite database file (relative to home)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    pub debounce_ms: Option<u64>,
    pub stability_interval_ms: Option<u64>,
    pub stability_checks: Option<u32>,
    pub min_file_bytes: Option<u64>,
    pub import_timeout_seconds: Option<u64>,
    pub stop_grace_ms: Option<u64>,
    pub max_concurrent_imports: Option<usize>,
    pub reconcile_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    pub max_pending: Option<usize>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Where imported files are copied
    pub upload_dir: PathBuf,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Transcription queue JSONL file
    pub queue_path: PathBuf,
    /// Queue capacity (unbounded when absent)
    pub queue_max_pending: Option<usize>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Watch runtime timings
    pub watch: WatchSettings,
}

/// Timings and limits of the watch runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    /// Quiet period after the last event for a path before importing it
    pub debounce: Duration,
    /// Delay between two stability polls
    pub stability_interval: Duration,
    /// Consecutive unchanged polls required
    pub stability_checks: u32,
    /// Smallest file considered complete
    pub min_file_bytes: u64,
    /// Upper bound for copy + persist + enqueue
    pub import_timeout: Duration,
    /// How long stop waits for a runner loop to exit
    pub stop_grace: Duration,
    /// Concurrent imports across all folders (0 = unbounded)
    pub max_concurrent_imports: usize,
    /// How often `serve` re-syncs runners with storage
    pub reconcile_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            stability_interval: Duration::from_secs(1),
            stability_checks: 3,
            min_file_bytes: 1,
            import_timeout: Duration::from_secs(300),
            stop_grace: Duration::from_secs(3),
            max_concurrent_imports: 4,
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl WatchSettings {
    /// Overlay the values present in a config file section
    fn from_config(config: Option<&WatchConfig>) -> Self {
        let defaults = Self::default();
        let Some(config) = config else {
            return defaults;
        };

        Self {
            debounce: config
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            stability_interval: config
                .stability_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stability_interval),
            stability_checks: config.stability_checks.unwrap_or(defaults.stability_checks),
            min_file_bytes: config.min_file_bytes.unwrap_or(defaults.min_file_bytes),
            import_timeout: config
                .import_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.import_timeout),
            stop_grace: config
                .stop_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stop_grace),
            max_concurrent_imports: config
                .max_concurrent_imports
                .unwrap_or(defaults.max_concurrent_imports),
            reconcile_interval: config
                .reconcile_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".mediawatch").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Resolve from an env var, then a config value relative to `base`, then a default
fn layered_path(env_var: &str, configured: Option<&str>, base: &Path, default: PathBuf) -> PathBuf {
    if let Ok(value) = std::env::var(env_var) {
        PathBuf::from(value)
    } else if let Some(value) = configured {
        resolve_path(base, value)
    } else {
        default
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".mediawatch");

    let config_file = find_config_file();
    let parsed = config_file
        .as_deref()
        .map(load_config_file)
        .transpose()?;

    let paths = parsed.as_ref().map(|c| c.paths.clone()).unwrap_or_default();

    // home is relative to the .mediawatch/ directory holding config.yaml
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let home = layered_path(
        "MEDIAWATCH_HOME",
        paths.home.as_deref(),
        config_dir,
        default_home,
    );

    let upload_dir = layered_path(
        "MEDIAWATCH_UPLOAD_DIR",
        paths.upload_dir.as_deref(),
        &home,
        home.join("uploads"),
    );

    let database_path = layered_path(
        "MEDIAWATCH_DATABASE",
        paths.database.as_deref(),
        &home,
        home.join("mediawatch.db"),
    );

    let watch = WatchSettings::from_config(parsed.as_ref().and_then(|c| c.watch.as_ref()));
    let queue_max_pending = parsed
        .as_ref()
        .and_then(|c| c.queue.as_ref())
        .and_then(|q| q.max_pending);

    Ok(ResolvedConfig {
        queue_path: home.join("transcription_queue.jsonl"),
        home,
        upload_dir,
        database_path,
        queue_max_pending,
        config_file,
        watch,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
