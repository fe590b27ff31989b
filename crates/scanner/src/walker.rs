//! Queue-based traversal of the configured roots.
//!
//! Directories are visited breadth first from an explicit queue, so deep
//! trees never grow the stack.  A directory turns into a vault root the first
//! time it is seen holding the vault marker folder; notes are only collected
//! underneath a vault root.

use std::collections::{HashSet, VecDeque};

use anyhow::anyhow;
use tracing::{debug, warn};
use vaultbell_config::ScanConfig;

use crate::error::{ScanError, ScanIssue};
use crate::fs::{FileStat, FileSystem};
use crate::schema::FileEntry;
use crate::store::EntryStore;
use crate::vault::vault_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    pub vault_marker: String,
    pub trash_marker: String,
    /// Note extension without the leading dot, compared case-insensitively.
    pub note_extension: String,
}

impl From<&ScanConfig> for WalkOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            vault_marker: config.vault_marker.clone(),
            trash_marker: config.trash_marker.clone(),
            note_extension: config.note_extension.clone(),
        }
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

impl WalkOptions {
    fn is_pruned(&self, name: &str) -> bool {
        name.ends_with(&self.trash_marker) || name.ends_with(&self.vault_marker)
    }

    fn is_note(&self, name: &str) -> bool {
        name.rsplit_once('.')
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(&self.note_extension))
    }
}

/// A note file found inside a vault.
#[derive(Debug, Clone)]
pub struct NoteCandidate {
    pub directory: String,
    pub vault: String,
    pub file: FileStat,
    /// Stored entry for the same directory and file name.
    pub previous: Option<FileEntry>,
    pub needs_parse: bool,
}

#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub candidates: Vec<NoteCandidate>,
    /// Vault names in discovery order, without duplicates.
    pub vaults: Vec<String>,
    /// Ids of stored entries whose file was found again.
    pub seen_ids: HashSet<u64>,
    /// Directories whose subtree could not be walked.  Stored entries under
    /// them are neither seen nor orphaned.
    pub abandoned_dirs: Vec<String>,
    pub issues: Vec<ScanIssue>,
}

impl WalkOutcome {
    fn abandon(&mut self, dir: &str, err: anyhow::Error) {
        warn!(dir, error = %err, "abandoning directory");
        self.issues.push(ScanIssue::new(dir, format!("{err:#}")));
        self.abandoned_dirs.push(dir.to_string());
    }
}

/// Whether a note must be read again.
///
/// New notes, notes modified after the stored copy and notes that still carry
/// a trigger are re-parsed; a trigger may need recomputing even when the file
/// is untouched.
pub fn needs_reparse(file: &FileStat, previous: Option<&FileEntry>) -> bool {
    match previous {
        None => true,
        Some(entry) => file.last_modified > entry.modified_at || entry.triggers_at.is_some(),
    }
}

/// Walk every root and collect note candidates.
///
/// Only a failure to stat a root aborts the walk; any other listing or lookup
/// failure abandons that directory's subtree and is reported as an issue.
pub async fn walk(
    fs: &dyn FileSystem,
    store: &dyn EntryStore,
    roots: &[String],
    options: &WalkOptions,
) -> Result<WalkOutcome, ScanError> {
    let mut outcome = WalkOutcome::default();
    let mut queue: VecDeque<(String, String)> = VecDeque::new();

    for root in roots {
        let stat = fs
            .stat(root)
            .await
            .map_err(|source| ScanError::RootUnavailable {
                path: root.clone(),
                source,
            })?;
        if !stat.is_directory {
            return Err(ScanError::RootUnavailable {
                path: root.clone(),
                source: anyhow!("not a directory"),
            });
        }
        queue.push_back((stat.path, String::new()));
    }

    while let Some((dir, mut vault)) = queue.pop_front() {
        let children = match fs.list_children(&dir).await {
            Ok(children) => children,
            Err(err) => {
                outcome.abandon(&dir, err);
                continue;
            }
        };

        if vault.is_empty()
            && children
                .iter()
                .any(|child| child.is_directory && child.name == options.vault_marker)
        {
            vault = vault_name(&dir);
            debug!(dir = %dir, vault = %vault, "found vault root");
            if !outcome.vaults.contains(&vault) {
                outcome.vaults.push(vault.clone());
            }
        }

        let has_notes = !vault.is_empty()
            && children
                .iter()
                .any(|child| !child.is_directory && options.is_note(&child.name));
        let previous = if has_notes {
            match store.select_by_directory(&dir).await {
                Ok(previous) => previous,
                Err(err) => {
                    outcome.abandon(&dir, err);
                    continue;
                }
            }
        } else {
            Vec::new()
        };

        for child in children {
            if child.is_directory {
                if !options.is_pruned(&child.name) {
                    queue.push_back((child.path, vault.clone()));
                }
                continue;
            }
            if vault.is_empty() || !options.is_note(&child.name) {
                continue;
            }

            let previous = previous
                .iter()
                .find(|entry| entry.file_name == child.name)
                .cloned();
            if let Some(entry) = &previous {
                outcome.seen_ids.insert(entry.id);
            }
            let needs_parse = needs_reparse(&child, previous.as_ref());
            outcome.candidates.push(NoteCandidate {
                directory: dir.clone(),
                vault: vault.clone(),
                file: child,
                previous,
                needs_parse,
            });
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEntryStore, MemoryFileSystem};
    use crate::schema::EntryWrite;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn sample_tree() -> MemoryFileSystem {
        let fs = MemoryFileSystem::new();
        fs.add_dir("/root/Brain/.obsidian", t0()).await;
        fs.add_file("/root/Brain/inbox.md", "hi", t0()).await;
        fs.add_file("/root/Brain/Photo.PNG", "", t0()).await;
        fs.add_file("/root/Brain/daily/2024-01-01.MD", "day", t0()).await;
        fs.add_file("/root/Brain/.trash/old.md", "gone", t0()).await;
        fs.add_file("/root/Brain/archive.trash/old.md", "gone", t0()).await;
        fs.add_file("/root/loose.md", "outside", t0()).await;
        fs
    }

    fn names(outcome: &WalkOutcome) -> Vec<&str> {
        outcome
            .candidates
            .iter()
            .map(|c| c.file.name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn collects_notes_inside_vaults_only() {
        let fs = sample_tree().await;
        let store = MemoryEntryStore::new();
        let outcome = walk(&fs, &store, &["/root".to_string()], &WalkOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.vaults, vec!["Brain"]);
        assert_eq!(names(&outcome), vec!["inbox.md", "2024-01-01.MD"]);
        assert!(outcome.candidates.iter().all(|c| c.vault == "Brain"));
        assert!(outcome.candidates.iter().all(|c| c.needs_parse));
        assert!(outcome.issues.is_empty());
    }

    #[tokio::test]
    async fn missing_root_aborts() {
        let fs = MemoryFileSystem::new();
        let store = MemoryEntryStore::new();
        let err = walk(&fs, &store, &["/nope".to_string()], &WalkOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::RootUnavailable { .. }));
    }

    #[tokio::test]
    async fn unreadable_directory_is_abandoned() {
        let fs = sample_tree().await;
        fs.fail_on("/root/Brain/daily").await;
        let store = MemoryEntryStore::new();
        let outcome = walk(&fs, &store, &["/root".to_string()], &WalkOptions::default())
            .await
            .unwrap();

        assert_eq!(names(&outcome), vec!["inbox.md"]);
        assert_eq!(outcome.abandoned_dirs, vec!["/root/Brain/daily"]);
        assert_eq!(outcome.issues.len(), 1);
    }

    #[tokio::test]
    async fn skip_rule_uses_stored_entries() {
        let fs = sample_tree().await;
        let store = MemoryEntryStore::new();
        let stored = |name: &str, modified: DateTime<Utc>, trigger: Option<DateTime<Utc>>| {
            FileEntry {
                id: 0,
                directory: "/root/Brain".to_string(),
                file_name: name.to_string(),
                content_preview: String::new(),
                vault: "Brain".to_string(),
                modified_at: modified,
                triggers_at: trigger,
                repeats: None,
                stop_on: None,
            }
        };
        fs.add_file("/root/Brain/pending.md", "p", t0()).await;
        fs.add_file("/root/Brain/edited.md", "e", t0() + Duration::hours(1)).await;
        store
            .upsert(vec![
                EntryWrite::Insert(stored("inbox.md", t0(), None)),
                EntryWrite::Insert(stored("pending.md", t0(), Some(t0() + Duration::days(1)))),
                EntryWrite::Insert(stored("edited.md", t0(), None)),
            ])
            .await
            .unwrap();

        let outcome = walk(&fs, &store, &["/root".to_string()], &WalkOptions::default())
            .await
            .unwrap();

        let parse_of = |name: &str| {
            outcome
                .candidates
                .iter()
                .find(|c| c.file.name == name)
                .map(|c| c.needs_parse)
                .unwrap()
        };
        assert!(!parse_of("inbox.md"));
        assert!(parse_of("pending.md"));
        assert!(parse_of("edited.md"));
        assert!(parse_of("2024-01-01.MD"));
        assert_eq!(outcome.seen_ids, HashSet::from([1, 2, 3]));
    }
}
