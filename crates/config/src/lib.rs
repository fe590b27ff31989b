use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Default path of the TOML config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Ceiling for the diagnostic error log before the oldest lines are dropped.
pub const DEFAULT_DIAGNOSTIC_LOG_MAX_BYTES: u64 = 9 * 1024 * 1024;

// ── Scan config ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory walked on every pass.  Only used to seed the persisted scan
    /// state on first run; afterwards the state file is authoritative.
    pub root_directory: String,
    /// Minutes between passes when running `vaultbell watch`.
    pub interval_minutes: u64,
    /// Only this many leading bytes of a note are read when looking for
    /// frontmatter and task annotations.
    pub read_prefix_bytes: usize,
    /// Maximum number of characters kept as the notification body.
    pub content_preview_limit: usize,
    /// Maximum number of pending notifications kept scheduled at once.
    pub notification_limit: usize,
    /// Child folder that marks its parent directory as a vault root.
    pub vault_marker: String,
    /// Folder names ending with this suffix are never descended into.
    pub trash_marker: String,
    /// Extension (without the dot) of files treated as notes.
    pub note_extension: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root_directory: String::new(),
            interval_minutes: 15,
            read_prefix_bytes: 5000,
            content_preview_limit: 100,
            notification_limit: 50,
            vault_marker: ".obsidian".to_string(),
            trash_marker: ".trash".to_string(),
            note_extension: "md".to_string(),
        }
    }
}

// ── Task scan config ─────────────────────────────────────────────────────────

/// Settings for reminders derived from Obsidian Tasks style annotations
/// (`- [ ] water plants 📅 2024-05-01`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub enabled: bool,
    /// Time of day stamped onto `start` dates.
    pub start_time: NaiveTime,
    /// Time of day stamped onto `scheduled` dates.
    pub scheduled_time: NaiveTime,
    /// Time of day stamped onto `due` dates.
    pub due_time: NaiveTime,
    /// When non-empty, task annotations are only honoured in directories whose
    /// path contains this fragment.
    pub restricted_subdirectory: String,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: nine_am(),
            scheduled_time: nine_am(),
            due_time: nine_am(),
            restricted_subdirectory: String::new(),
        }
    }
}

pub fn nine_am() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the entry database, scan state, notification outbox
    /// and diagnostic logs.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".vaultbell".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub diagnostic_log_max_bytes: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            diagnostic_log_max_bytes: DEFAULT_DIAGNOSTIC_LOG_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub tasks: TasksConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("VAULTBELL_ROOT") {
            if !value.is_empty() {
                config.scan.root_directory = value;
            }
        }

        if let Ok(value) = env::var("VAULTBELL_DATA_DIR") {
            if !value.is_empty() {
                config.storage.data_dir = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    pub fn entries_db_path(&self) -> PathBuf {
        self.data_dir().join("entries.redb")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir().join("state.json")
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir().join("notifications.json")
    }

    pub fn diagnostic_log_path(&self) -> PathBuf {
        self.data_dir().join("errors.log")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
