//! Change sets between two scans.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::schema::{EntryWrite, FileEntry};
use crate::vault::is_within;

/// Stable digest over every field of an entry.
///
/// Fields are fed in a fixed order, each tagged with its name, so the digest
/// does not depend on any serializer's layout.
pub fn content_hash(entry: &FileEntry) -> String {
    fn field(hasher: &mut Sha256, name: &str, value: Option<&str>) {
        hasher.update(name.as_bytes());
        match value {
            Some(value) => {
                hasher.update(b"=");
                hasher.update(value.len().to_le_bytes());
                hasher.update(value.as_bytes());
            }
            None => hasher.update(b"!"),
        }
        hasher.update(b";");
    }
    fn instant(t: &DateTime<Utc>) -> String {
        t.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    let mut hasher = Sha256::new();
    field(&mut hasher, "id", Some(&entry.id.to_string()));
    field(&mut hasher, "directory", Some(&entry.directory));
    field(&mut hasher, "file_name", Some(&entry.file_name));
    field(&mut hasher, "content_preview", Some(&entry.content_preview));
    field(&mut hasher, "vault", Some(&entry.vault));
    field(&mut hasher, "modified_at", Some(&instant(&entry.modified_at)));
    field(
        &mut hasher,
        "triggers_at",
        entry.triggers_at.as_ref().map(instant).as_deref(),
    );
    field(&mut hasher, "repeats", entry.repeats.as_deref());
    field(
        &mut hasher,
        "stop_on",
        entry.stop_on.as_ref().map(instant).as_deref(),
    );
    format!("{:x}", hasher.finalize())
}

/// Stored entries whose file was not found by the walk.
///
/// Entries under an abandoned directory are kept: the walk could not tell
/// whether their files still exist.
pub fn orphaned_ids(stored: &[FileEntry], seen: &HashSet<u64>, abandoned: &[String]) -> Vec<u64> {
    stored
        .iter()
        .filter(|entry| !seen.contains(&entry.id))
        .filter(|entry| !abandoned.iter().any(|dir| is_within(&entry.directory, dir)))
        .map(|entry| entry.id)
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotificationDiff {
    pub to_cancel: Vec<FileEntry>,
    pub to_add: Vec<FileEntry>,
}

impl NotificationDiff {
    pub fn is_empty(&self) -> bool {
        self.to_cancel.is_empty() && self.to_add.is_empty()
    }
}

/// Compare scheduled entries before and after a pass by content identity.
pub fn diff_notifications(old: &[FileEntry], new: &[FileEntry]) -> NotificationDiff {
    let old_hashes: HashSet<String> = old.iter().map(content_hash).collect();
    let new_hashes: HashSet<String> = new.iter().map(content_hash).collect();

    NotificationDiff {
        to_cancel: old
            .iter()
            .filter(|entry| !new_hashes.contains(&content_hash(entry)))
            .cloned()
            .collect(),
        to_add: new
            .iter()
            .filter(|entry| !old_hashes.contains(&content_hash(entry)))
            .cloned()
            .collect(),
    }
}

/// Write for a freshly parsed entry: replace the stored row when there is one.
pub fn plan_write(previous: Option<&FileEntry>, mut parsed: FileEntry) -> EntryWrite {
    match previous {
        Some(previous) => {
            parsed.id = previous.id;
            EntryWrite::Update(parsed)
        }
        None => EntryWrite::Insert(parsed),
    }
}
