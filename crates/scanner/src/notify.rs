//! Notification collaborator contract.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::FileEntry;
use crate::vault::{note_path_in_vault, open_url};

/// What the user sees and where tapping the notification leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub vault: String,
    /// Vault-relative note path without extension.
    pub path: String,
}

impl NotificationPayload {
    pub fn for_entry(entry: &FileEntry) -> Self {
        Self {
            title: entry.stem().to_string(),
            body: entry.content_preview.clone(),
            vault: entry.vault.clone(),
            path: note_path_in_vault(&entry.directory, &entry.file_name, &entry.vault),
        }
    }

    pub fn open_url(&self) -> String {
        open_url(&self.vault, &self.path)
    }
}

/// Schedules one-shot notifications keyed by entry id.
///
/// At most one schedule is outstanding per id; scheduling an id again
/// replaces the earlier one.
#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    async fn cancel(&self, ids: &[String]) -> Result<()>;

    async fn schedule_one_shot(
        &self,
        id: &str,
        when: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<()>;
}
