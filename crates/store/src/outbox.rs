//! File-backed [`NotificationScheduler`].
//!
//! Pending one-shot notifications live in a JSON array guarded by an advisory
//! lock, so a `vaultbell watch` process and one-off CLI invocations can share
//! the same outbox.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use vaultbell_scanner::{NotificationPayload, NotificationScheduler};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub id: String,
    pub when: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: NotificationPayload,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutboxScheduler {
    path: PathBuf,
}

impl OutboxScheduler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// All pending notifications, soonest first.
    pub fn pending(&self) -> Result<Vec<PendingNotification>> {
        self.with_locked(|pending| Ok(pending.clone()))
    }

    /// Remove and return every notification due at or before `now`.
    pub fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<PendingNotification>> {
        self.with_locked(|pending| {
            let (due, later): (Vec<_>, Vec<_>) = std::mem::take(pending)
                .into_iter()
                .partition(|n| n.when <= now);
            *pending = later;
            Ok(due)
        })
    }

    /// Run `f` over the outbox contents while holding an exclusive lock,
    /// writing the (possibly modified) list back afterwards.
    fn with_locked<T>(
        &self,
        f: impl FnOnce(&mut Vec<PendingNotification>) -> Result<T>,
    ) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("opening outbox {}", self.path.display()))?;
        file.lock_exclusive()?;

        let result = read_and_update(&mut file, f);
        file.unlock()?;
        result
    }
}

fn read_and_update<T>(
    file: &mut File,
    f: impl FnOnce(&mut Vec<PendingNotification>) -> Result<T>,
) -> Result<T> {
    let mut raw = String::new();
    file.read_to_string(&mut raw)?;
    let mut pending: Vec<PendingNotification> = if raw.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&raw).context("parsing notification outbox")?
    };

    let before = pending.clone();
    let out = f(&mut pending)?;
    if pending != before {
        pending.sort_by(|a, b| a.when.cmp(&b.when).then_with(|| a.id.cmp(&b.id)));
        let rendered = serde_json::to_string_pretty(&pending)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(rendered.as_bytes())?;
        file.sync_all()?;
    }
    Ok(out)
}

#[async_trait]
impl NotificationScheduler for OutboxScheduler {
    async fn cancel(&self, ids: &[String]) -> Result<()> {
        self.with_locked(|pending| {
            pending.retain(|n| !ids.contains(&n.id));
            Ok(())
        })
    }

    async fn schedule_one_shot(
        &self,
        id: &str,
        when: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<()> {
        self.with_locked(|pending| {
            pending.retain(|n| n.id != id);
            pending.push(PendingNotification {
                id: id.to_string(),
                when,
                payload,
                scheduled_at: Utc::now(),
            });
            Ok(())
        })
    }
}
