use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultbell_config::{AppConfig, TasksConfig};

/// One catalogued note file.
///
/// `id` is assigned by the entry store on first insert and preserved for the
/// same `(directory, file_name)` pair while the file keeps existing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: u64,
    pub directory: String,
    pub file_name: String,
    pub content_preview: String,
    pub vault: String,
    pub modified_at: DateTime<Utc>,
    /// Next instant this note should fire, always in the future when computed.
    pub triggers_at: Option<DateTime<Utc>>,
    /// Lower-cased recurrence rule text from the frontmatter.
    pub repeats: Option<String>,
    pub stop_on: Option<DateTime<Utc>>,
}

impl FileEntry {
    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.file_name,
        }
    }

    pub fn notification_id(&self) -> String {
        self.id.to_string()
    }
}

/// A single persistence write produced by a scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryWrite {
    /// A note seen for the first time.  The store ignores `id` and assigns one.
    Insert(FileEntry),
    /// A re-parsed note replacing the stored row with the same `id`.
    Update(FileEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Add,
    Cancel,
}

/// Instruction for the notification collaborator.  Ownership of the entry
/// moves to the collaborator once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationCommand {
    pub kind: CommandKind,
    pub entry: FileEntry,
}

impl NotificationCommand {
    pub fn add(entry: FileEntry) -> Self {
        Self {
            kind: CommandKind::Add,
            entry,
        }
    }

    pub fn cancel(entry: FileEntry) -> Self {
        Self {
            kind: CommandKind::Cancel,
            entry,
        }
    }
}

/// Persisted scan settings and the results of the last completed pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanState {
    pub root_directory: String,
    pub scan_interval_minutes: u64,
    /// Vault names discovered by the last pass, in discovery order.
    pub vaults: Vec<String>,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub last_scan_duration_ms: Option<u64>,
    pub task_scan: Option<TasksConfig>,
}

impl Default for ScanState {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ScanState {
    /// First-run state seeded from the application config.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            root_directory: config.scan.root_directory.clone(),
            scan_interval_minutes: config.scan.interval_minutes,
            vaults: Vec::new(),
            last_scan_time: None,
            last_scan_duration_ms: None,
            task_scan: Some(config.tasks.clone()),
        }
    }

    /// Task-scan settings, only when scanning is switched on.
    pub fn enabled_task_scan(&self) -> Option<&TasksConfig> {
        self.task_scan.as_ref().filter(|tasks| tasks.enabled)
    }
}

/// Truncate `s` to at most `max_chars` Unicode scalar values.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
