//! [`EntryStore`] backed by a single [`redb`] file.
//!
//! # Tables
//!
//! | Name              | Key              | Value                          |
//! |-------------------|------------------|--------------------------------|
//! | `entries`         | entry id (u64)   | JSON-serialised [`FileEntry`]  |
//! | `directory_index` | directory (&str) | newline-separated id list      |
//! | `meta`            | `next_id`        | next id to hand out (u64)      |

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, ReadableTableMetadata, Table, TableDefinition};
use tracing::debug;
use vaultbell_scanner::{EntryStore, EntryWrite, FileEntry};

const ENTRIES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("entries");
const DIRECTORY_TABLE: TableDefinition<&str, &str> = TableDefinition::new("directory_index");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ID_KEY: &str = "next_id";

pub struct RedbEntryStore {
    db: Database,
}

impl RedbEntryStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening entry database at {}", path.display()))?;

        {
            let tx = db.begin_write()?;
            tx.open_table(ENTRIES_TABLE)?;
            tx.open_table(DIRECTORY_TABLE)?;
            tx.open_table(META_TABLE)?;
            tx.commit()?;
        }

        debug!(path = %path.display(), "entry store opened");
        Ok(Self { db })
    }

    pub fn len(&self) -> Result<usize> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(ENTRIES_TABLE)?;
        Ok(tbl.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn load_all(&self) -> Result<Vec<FileEntry>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(ENTRIES_TABLE)?;
        let mut entries = Vec::new();
        for row in tbl.iter()? {
            let (_, value) = row?;
            entries.push(decode(value.value())?);
        }
        Ok(entries)
    }
}

fn decode(bytes: &[u8]) -> Result<FileEntry> {
    serde_json::from_slice(bytes).context("decoding stored entry")
}

fn parse_ids(list: &str) -> Vec<u64> {
    list.lines().filter_map(|s| s.trim().parse().ok()).collect()
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn index_ids(tbl: &Table<'_, &'static str, &'static str>, dir: &str) -> Result<Vec<u64>> {
    Ok(tbl
        .get(dir)?
        .map(|v| parse_ids(v.value()))
        .unwrap_or_default())
}

fn index_add(tbl: &mut Table<'_, &'static str, &'static str>, dir: &str, id: u64) -> Result<()> {
    let mut ids = index_ids(tbl, dir)?;
    if !ids.contains(&id) {
        ids.push(id);
        tbl.insert(dir, join_ids(&ids).as_str())?;
    }
    Ok(())
}

fn index_remove(tbl: &mut Table<'_, &'static str, &'static str>, dir: &str, id: u64) -> Result<()> {
    let mut ids = index_ids(tbl, dir)?;
    ids.retain(|&existing| existing != id);
    if ids.is_empty() {
        tbl.remove(dir)?;
    } else {
        tbl.insert(dir, join_ids(&ids).as_str())?;
    }
    Ok(())
}

fn take_entry(tbl: &mut Table<'_, u64, &'static [u8]>, id: u64) -> Result<Option<FileEntry>> {
    let bytes = tbl.remove(id)?.map(|v| v.value().to_vec());
    bytes.map(|bytes| decode(&bytes)).transpose()
}

#[async_trait]
impl EntryStore for RedbEntryStore {
    async fn select_by_directory(&self, dir: &str) -> Result<Vec<FileEntry>> {
        let tx = self.db.begin_read()?;
        let index = tx.open_table(DIRECTORY_TABLE)?;
        let ids = index
            .get(dir)?
            .map(|v| parse_ids(v.value()))
            .unwrap_or_default();

        let tbl = tx.open_table(ENTRIES_TABLE)?;
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = tbl.get(id)? {
                entries.push(decode(value.value())?);
            }
        }
        Ok(entries)
    }

    async fn select_all(&self) -> Result<Vec<FileEntry>> {
        self.load_all()
    }

    async fn select_all_with_trigger(&self, limit: usize) -> Result<Vec<FileEntry>> {
        let mut scheduled: Vec<FileEntry> = self
            .load_all()?
            .into_iter()
            .filter(|entry| entry.triggers_at.is_some())
            .collect();
        scheduled.sort_by(|a, b| a.triggers_at.cmp(&b.triggers_at).then(a.id.cmp(&b.id)));
        scheduled.truncate(limit);
        Ok(scheduled)
    }

    async fn upsert(&self, writes: Vec<EntryWrite>) -> Result<Vec<FileEntry>> {
        let mut stored = Vec::with_capacity(writes.len());
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(ENTRIES_TABLE)?;
            let mut index = tx.open_table(DIRECTORY_TABLE)?;
            let mut meta = tx.open_table(META_TABLE)?;
            let mut next_id = meta.get(NEXT_ID_KEY)?.map(|v| v.value()).unwrap_or(1);

            for write in writes {
                let entry = match write {
                    EntryWrite::Insert(mut entry) => {
                        entry.id = next_id;
                        next_id += 1;
                        entry
                    }
                    EntryWrite::Update(entry) => {
                        if let Some(old) = take_entry(&mut tbl, entry.id)? {
                            if old.directory != entry.directory {
                                index_remove(&mut index, &old.directory, old.id)?;
                            }
                        }
                        next_id = next_id.max(entry.id + 1);
                        entry
                    }
                };
                let bytes = serde_json::to_vec(&entry)?;
                tbl.insert(entry.id, bytes.as_slice())?;
                index_add(&mut index, &entry.directory, entry.id)?;
                stored.push(entry);
            }

            meta.insert(NEXT_ID_KEY, next_id)?;
        }
        tx.commit()?;
        Ok(stored)
    }

    async fn delete_by_ids(&self, ids: &[u64]) -> Result<usize> {
        let mut removed = 0;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(ENTRIES_TABLE)?;
            let mut index = tx.open_table(DIRECTORY_TABLE)?;
            for &id in ids {
                if let Some(entry) = take_entry(&mut tbl, id)? {
                    index_remove(&mut index, &entry.directory, id)?;
                    removed += 1;
                }
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    async fn delete_not_matching(&self, dir: &str, names_seen: &[String]) -> Result<usize> {
        let mut removed = 0;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(ENTRIES_TABLE)?;
            let mut index = tx.open_table(DIRECTORY_TABLE)?;
            let mut kept = Vec::new();
            for id in index_ids(&index, dir)? {
                let bytes = tbl.get(id)?.map(|v| v.value().to_vec());
                let Some(bytes) = bytes else {
                    continue;
                };
                if names_seen.contains(&decode(&bytes)?.file_name) {
                    kept.push(id);
                } else {
                    tbl.remove(id)?;
                    removed += 1;
                }
            }
            if kept.is_empty() {
                index.remove(dir)?;
            } else {
                index.insert(dir, join_ids(&kept).as_str())?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn entry(dir: &str, name: &str, trigger: Option<DateTime<Utc>>) -> FileEntry {
        FileEntry {
            id: 0,
            directory: dir.to_string(),
            file_name: name.to_string(),
            content_preview: format!("{name} preview"),
            vault: "Brain".to_string(),
            modified_at: t0(),
            triggers_at: trigger,
            repeats: None,
            stop_on: None,
        }
    }

    fn open() -> (tempfile::TempDir, RedbEntryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbEntryStore::open(dir.path().join("entries.redb")).unwrap();
        assert!(store.is_empty().unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn inserts_get_fresh_ids_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/entries.redb");
        {
            let store = RedbEntryStore::open(&path).unwrap();
            let stored = store
                .upsert(vec![
                    EntryWrite::Insert(entry("/v", "a.md", None)),
                    EntryWrite::Insert(entry("/v", "b.md", None)),
                ])
                .await
                .unwrap();
            assert_eq!(stored.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        }

        let store = RedbEntryStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        let stored = store
            .upsert(vec![EntryWrite::Insert(entry("/v", "c.md", None))])
            .await
            .unwrap();
        assert_eq!(stored[0].id, 3);
    }

    #[tokio::test]
    async fn update_replaces_by_id_and_moves_index() {
        let (_dir, store) = open();
        let stored = store
            .upsert(vec![EntryWrite::Insert(entry("/v", "a.md", None))])
            .await
            .unwrap();

        let mut moved = stored[0].clone();
        moved.directory = "/v/archive".to_string();
        moved.triggers_at = Some(t0() + Duration::days(1));
        store.upsert(vec![EntryWrite::Update(moved.clone())]).await.unwrap();

        assert!(store.select_by_directory("/v").await.unwrap().is_empty());
        assert_eq!(store.select_by_directory("/v/archive").await.unwrap(), vec![moved]);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_id_reinserts_and_bumps_counter() {
        let (_dir, store) = open();
        let mut restored = entry("/v", "a.md", None);
        restored.id = 10;
        store.upsert(vec![EntryWrite::Update(restored)]).await.unwrap();

        let stored = store
            .upsert(vec![EntryWrite::Insert(entry("/v", "b.md", None))])
            .await
            .unwrap();
        assert_eq!(stored[0].id, 11);
    }

    #[tokio::test]
    async fn triggered_entries_come_soonest_first() {
        let (_dir, store) = open();
        store
            .upsert(vec![
                EntryWrite::Insert(entry("/v", "later.md", Some(t0() + Duration::days(2)))),
                EntryWrite::Insert(entry("/v", "none.md", None)),
                EntryWrite::Insert(entry("/v", "soon.md", Some(t0() + Duration::days(1)))),
            ])
            .await
            .unwrap();

        let names: Vec<String> = store
            .select_all_with_trigger(10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["soon.md", "later.md"]);
        assert_eq!(store.select_all_with_trigger(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deletes_keep_the_index_consistent() {
        let (_dir, store) = open();
        store
            .upsert(vec![
                EntryWrite::Insert(entry("/v", "a.md", None)),
                EntryWrite::Insert(entry("/v", "b.md", None)),
                EntryWrite::Insert(entry("/v", "c.md", None)),
                EntryWrite::Insert(entry("/w", "d.md", None)),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_by_ids(&[1, 99]).await.unwrap(), 1);
        let removed = store
            .delete_not_matching("/v", &["c.md".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let left: Vec<String> = store
            .select_by_directory("/v")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(left, vec!["c.md"]);
        assert_eq!(store.select_all().await.unwrap().len(), 2);
    }
}
