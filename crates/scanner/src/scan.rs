//! One scan pass: walk, parse, persist, reconcile.

use std::collections::HashSet;
use std::time::{Duration, Instant, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};
use vaultbell_config::{ScanConfig, TasksConfig};

use crate::error::{ScanError, ScanIssue};
use crate::frontmatter::{content_preview, parse_frontmatter};
use crate::fs::FileSystem;
use crate::notify::{NotificationPayload, NotificationScheduler};
use crate::reconcile::{NotificationDiff, diff_notifications, orphaned_ids, plan_write};
use crate::schema::{EntryWrite, FileEntry, NotificationCommand, ScanState};
use crate::store::EntryStore;
use crate::tasks::{earliest_task_trigger, task_scan_applies};
use crate::trigger::select_trigger;
use crate::walker::{NoteCandidate, WalkOptions, walk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub read_prefix_bytes: usize,
    pub content_preview_limit: usize,
    /// Size of the scheduled set compared between passes.
    pub notification_limit: usize,
}

impl From<&ScanConfig> for ScanLimits {
    fn from(config: &ScanConfig) -> Self {
        Self {
            read_prefix_bytes: config.read_prefix_bytes,
            content_preview_limit: config.content_preview_limit,
            notification_limit: config.notification_limit,
        }
    }
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub vaults: Vec<String>,
    pub notes_seen: usize,
    pub notes_parsed: usize,
    pub ids_deleted: Vec<u64>,
    pub notifications_to_add: Vec<NotificationCommand>,
    pub notifications_to_cancel: Vec<NotificationCommand>,
    pub issues: Vec<ScanIssue>,
}

/// Runs passes against a set of collaborators.
///
/// A `Scanner` holds no state between passes.  Callers must make sure only
/// one pass runs at a time, because the entry store is mutated in several
/// non-transactional steps.
pub struct Scanner<'a> {
    fs: &'a dyn FileSystem,
    store: &'a dyn EntryStore,
    scheduler: &'a dyn NotificationScheduler,
    limits: ScanLimits,
    walk: WalkOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        store: &'a dyn EntryStore,
        scheduler: &'a dyn NotificationScheduler,
    ) -> Self {
        Self {
            fs,
            store,
            scheduler,
            limits: ScanLimits::default(),
            walk: WalkOptions::default(),
        }
    }

    pub fn with_config(mut self, config: &ScanConfig) -> Self {
        self.limits = ScanLimits::from(config);
        self.walk = WalkOptions::from(config);
        self
    }

    /// Run one full pass.
    ///
    /// `now` fixes both the reference instant and the local zone used for
    /// dates without an offset.  On success `state` gets the discovered
    /// vaults and the scan time; on any error it is left untouched.
    pub async fn run<Tz: TimeZone>(
        &self,
        state: &mut ScanState,
        now: DateTime<Tz>,
    ) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let started_at = now.with_timezone(&Utc);

        if state.root_directory.trim().is_empty() {
            return Err(ScanError::NotConfigured);
        }

        let previous = self
            .store
            .select_all_with_trigger(self.limits.notification_limit)
            .await
            .map_err(ScanError::StoreUnavailable)?;

        let roots = vec![state.root_directory.clone()];
        let outcome = walk(self.fs, self.store, &roots, &self.walk).await?;
        let mut issues = outcome.issues;

        let tasks = state.enabled_task_scan();
        let mut writes = Vec::new();
        for candidate in outcome.candidates.iter().filter(|c| c.needs_parse) {
            match self.parse_candidate(candidate, tasks, &now).await {
                Ok(write) => writes.push(write),
                Err(err) => {
                    warn!(path = %candidate.file.path, error = %err, "failed to read note");
                    issues.push(ScanIssue::new(&candidate.file.path, format!("{err:#}")));
                }
            }
        }
        let notes_parsed = writes.len();

        let stored = self
            .store
            .select_all()
            .await
            .map_err(ScanError::Persistence)?;
        let ids_deleted = orphaned_ids(&stored, &outcome.seen_ids, &outcome.abandoned_dirs);
        if !ids_deleted.is_empty() {
            self.store
                .delete_by_ids(&ids_deleted)
                .await
                .map_err(ScanError::Persistence)?;
        }
        self.store
            .upsert(writes)
            .await
            .map_err(ScanError::Persistence)?;

        let current = self
            .store
            .select_all_with_trigger(self.limits.notification_limit)
            .await
            .map_err(ScanError::Persistence)?;
        let diff = diff_notifications(&previous, &current);

        if let Err(err) = self.apply(&diff).await {
            self.restore(&diff).await;
            return Err(ScanError::Notification(err));
        }

        let duration = started.elapsed();
        state.vaults = outcome.vaults.clone();
        state.last_scan_time = Some(started_at);
        state.last_scan_duration_ms = Some(duration.as_millis() as u64);

        info!(
            vaults = outcome.vaults.len(),
            notes = outcome.candidates.len(),
            parsed = notes_parsed,
            deleted = ids_deleted.len(),
            added = diff.to_add.len(),
            cancelled = diff.to_cancel.len(),
            issues = issues.len(),
            elapsed_ms = duration.as_millis() as u64,
            "scan complete"
        );

        Ok(ScanReport {
            started_at,
            duration,
            vaults: outcome.vaults,
            notes_seen: outcome.candidates.len(),
            notes_parsed,
            ids_deleted,
            notifications_to_add: diff.to_add.into_iter().map(NotificationCommand::add).collect(),
            notifications_to_cancel: diff
                .to_cancel
                .into_iter()
                .map(NotificationCommand::cancel)
                .collect(),
            issues,
        })
    }

    async fn parse_candidate<Tz: TimeZone>(
        &self,
        candidate: &NoteCandidate,
        tasks: Option<&TasksConfig>,
        now: &DateTime<Tz>,
    ) -> anyhow::Result<EntryWrite> {
        let text = self
            .fs
            .read_prefix(&candidate.file.path, self.limits.read_prefix_bytes)
            .await?;

        let frontmatter = parse_frontmatter(&text, &now.timezone());
        let task_trigger = tasks
            .filter(|config| task_scan_applies(config, &candidate.directory))
            .and_then(|config| earliest_task_trigger(&text, config, now));
        let reminder = select_trigger(frontmatter.as_ref(), task_trigger, now);

        debug!(
            path = %candidate.file.path,
            triggers_at = ?reminder.triggers_at,
            repeats = ?reminder.repeats,
            "parsed note"
        );

        let parsed = FileEntry {
            id: 0,
            directory: candidate.directory.clone(),
            file_name: candidate.file.name.clone(),
            content_preview: content_preview(&text, self.limits.content_preview_limit),
            vault: candidate.vault.clone(),
            modified_at: candidate.file.last_modified,
            triggers_at: reminder.triggers_at,
            repeats: reminder.repeats,
            stop_on: reminder.stop_on,
        };
        Ok(plan_write(candidate.previous.as_ref(), parsed))
    }

    /// Hand the change set to the scheduler: cancellations first, then adds.
    async fn apply(&self, diff: &NotificationDiff) -> anyhow::Result<()> {
        if !diff.to_cancel.is_empty() {
            let ids: Vec<String> = diff.to_cancel.iter().map(FileEntry::notification_id).collect();
            self.scheduler.cancel(&ids).await?;
        }
        for entry in &diff.to_add {
            let Some(when) = entry.triggers_at else {
                continue;
            };
            self.scheduler
                .schedule_one_shot(
                    &entry.notification_id(),
                    when,
                    NotificationPayload::for_entry(entry),
                )
                .await?;
        }
        Ok(())
    }

    /// Undo a change set the scheduler only partly accepted, so the next pass
    /// recomputes it under the same ids.
    ///
    /// Adds that already went through are withdrawn and their rows keep the
    /// id but lose the trigger and modification time, which makes the next
    /// pass re-parse and add them again.  Rows that were only being cancelled
    /// go back to their value from before the pass.
    async fn restore(&self, diff: &NotificationDiff) {
        let added: Vec<String> = diff.to_add.iter().map(FileEntry::notification_id).collect();
        if !added.is_empty() {
            if let Err(err) = self.scheduler.cancel(&added).await {
                warn!(error = %err, "failed to withdraw notifications after scheduler failure");
            }
        }

        let re_added: HashSet<u64> = diff.to_add.iter().map(|entry| entry.id).collect();
        let placeholders = diff.to_add.iter().map(|entry| {
            EntryWrite::Update(FileEntry {
                modified_at: DateTime::<Utc>::from(UNIX_EPOCH),
                triggers_at: None,
                repeats: None,
                stop_on: None,
                ..entry.clone()
            })
        });
        let rows: Vec<EntryWrite> = diff
            .to_cancel
            .iter()
            .filter(|entry| !re_added.contains(&entry.id))
            .map(|entry| EntryWrite::Update(entry.clone()))
            .chain(placeholders)
            .collect();
        if let Err(err) = self.store.upsert(rows).await {
            warn!(error = %err, "failed to restore entries after scheduler failure");
        }
    }
}
