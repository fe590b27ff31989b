//! In-memory collaborators for tests and dry runs.
//!
//! All of them are cheap to construct and keep their contents behind a tokio
//! `Mutex`, so they can be shared through `Arc` the same way the on-disk
//! implementations are.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::fs::{FileStat, FileSystem};
use crate::notify::{NotificationPayload, NotificationScheduler};
use crate::schema::{EntryWrite, FileEntry, ScanState};
use crate::store::{EntryStore, SettingsStore};

// ── Filesystem ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Node {
    is_directory: bool,
    last_modified: DateTime<Utc>,
    content: String,
}

/// `/`-separated in-memory tree.  Parent directories are created implicitly.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    nodes: Mutex<BTreeMap<String, Node>>,
    failing: Mutex<HashSet<String>>,
}

fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_dir(&self, path: &str, modified: DateTime<Utc>) {
        let mut nodes = self.nodes.lock().await;
        insert_dir_chain(&mut nodes, path, modified);
    }

    /// Create or overwrite a file.
    pub async fn add_file(&self, path: &str, content: &str, modified: DateTime<Utc>) {
        let mut nodes = self.nodes.lock().await;
        if let Some(parent) = parent_of(path) {
            insert_dir_chain(&mut nodes, parent, modified);
        }
        nodes.insert(
            path.to_string(),
            Node {
                is_directory: false,
                last_modified: modified,
                content: content.to_string(),
            },
        );
    }

    /// Remove a file or a whole subtree.
    pub async fn remove(&self, path: &str) {
        let prefix = format!("{path}/");
        self.nodes
            .lock()
            .await
            .retain(|key, _| key != path && !key.starts_with(&prefix));
    }

    /// Make every operation on `path` fail until [`Self::heal`] is called.
    pub async fn fail_on(&self, path: &str) {
        self.failing.lock().await.insert(path.to_string());
    }

    pub async fn heal(&self, path: &str) {
        self.failing.lock().await.remove(path);
    }

    async fn check(&self, path: &str) -> Result<()> {
        if self.failing.lock().await.contains(path) {
            bail!("simulated I/O failure on {path}");
        }
        Ok(())
    }
}

fn insert_dir_chain(nodes: &mut BTreeMap<String, Node>, path: &str, modified: DateTime<Utc>) {
    let mut current = Some(path);
    while let Some(dir) = current.filter(|dir| !dir.is_empty()) {
        nodes.entry(dir.to_string()).or_insert_with(|| Node {
            is_directory: true,
            last_modified: modified,
            content: String::new(),
        });
        current = parent_of(dir);
    }
}

fn to_stat(path: &str, node: &Node) -> FileStat {
    FileStat {
        path: path.to_string(),
        name: name_of(path).to_string(),
        is_directory: node.is_directory,
        last_modified: node.last_modified,
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn stat(&self, path: &str) -> Result<FileStat> {
        self.check(path).await?;
        let nodes = self.nodes.lock().await;
        let node = nodes
            .get(path)
            .ok_or_else(|| anyhow!("no such file or directory: {path}"))?;
        Ok(to_stat(path, node))
    }

    async fn list_children(&self, dir: &str) -> Result<Vec<FileStat>> {
        self.check(dir).await?;
        let nodes = self.nodes.lock().await;
        match nodes.get(dir) {
            Some(node) if node.is_directory => {}
            Some(_) => bail!("not a directory: {dir}"),
            None => bail!("no such directory: {dir}"),
        }
        Ok(nodes
            .iter()
            .filter(|(path, _)| parent_of(path) == Some(dir))
            .map(|(path, node)| to_stat(path, node))
            .collect())
    }

    async fn read_prefix(&self, path: &str, max_bytes: usize) -> Result<String> {
        self.check(path).await?;
        let nodes = self.nodes.lock().await;
        let node = nodes
            .get(path)
            .filter(|node| !node.is_directory)
            .ok_or_else(|| anyhow!("no such file: {path}"))?;
        let bytes = node.content.as_bytes();
        let end = bytes.len().min(max_bytes);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

// ── Entry store ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct EntryTable {
    rows: BTreeMap<u64, FileEntry>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    table: Mutex<EntryTable>,
    unavailable: Mutex<bool>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going away (or coming back).
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().await = unavailable;
    }

    async fn check(&self) -> Result<()> {
        if *self.unavailable.lock().await {
            bail!("entry store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn select_by_directory(&self, dir: &str) -> Result<Vec<FileEntry>> {
        self.check().await?;
        let table = self.table.lock().await;
        Ok(table
            .rows
            .values()
            .filter(|entry| entry.directory == dir)
            .cloned()
            .collect())
    }

    async fn select_all(&self) -> Result<Vec<FileEntry>> {
        self.check().await?;
        Ok(self.table.lock().await.rows.values().cloned().collect())
    }

    async fn select_all_with_trigger(&self, limit: usize) -> Result<Vec<FileEntry>> {
        self.check().await?;
        let table = self.table.lock().await;
        let mut scheduled: Vec<FileEntry> = table
            .rows
            .values()
            .filter(|entry| entry.triggers_at.is_some())
            .cloned()
            .collect();
        scheduled.sort_by(|a, b| a.triggers_at.cmp(&b.triggers_at).then(a.id.cmp(&b.id)));
        scheduled.truncate(limit);
        Ok(scheduled)
    }

    async fn upsert(&self, writes: Vec<EntryWrite>) -> Result<Vec<FileEntry>> {
        self.check().await?;
        let mut table = self.table.lock().await;
        let mut stored = Vec::with_capacity(writes.len());
        for write in writes {
            let entry = match write {
                EntryWrite::Insert(mut entry) => {
                    table.next_id += 1;
                    entry.id = table.next_id;
                    entry
                }
                EntryWrite::Update(entry) => entry,
            };
            table.rows.insert(entry.id, entry.clone());
            stored.push(entry);
        }
        Ok(stored)
    }

    async fn delete_by_ids(&self, ids: &[u64]) -> Result<usize> {
        self.check().await?;
        let mut table = self.table.lock().await;
        Ok(ids
            .iter()
            .filter(|id| table.rows.remove(*id).is_some())
            .count())
    }

    async fn delete_not_matching(&self, dir: &str, names_seen: &[String]) -> Result<usize> {
        self.check().await?;
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table
            .rows
            .retain(|_, entry| entry.directory != dir || names_seen.contains(&entry.file_name));
        Ok(before - table.rows.len())
    }
}

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    state: Mutex<Option<ScanState>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Option<ScanState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &ScanState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

/// One call received by a [`RecordingScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCall {
    Cancel(Vec<String>),
    Schedule { id: String, when: DateTime<Utc> },
}

/// Keeps pending notifications in a map and records every call.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    pending: Mutex<HashMap<String, (DateTime<Utc>, NotificationPayload)>>,
    calls: Mutex<Vec<SchedulerCall>>,
    failing: Mutex<bool>,
    schedule_budget: Mutex<Option<usize>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent call while `failing` is set.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }

    /// Accept only `budget` more `schedule_one_shot` calls and reject the
    /// rest; `None` lifts the limit.  Cancels are unaffected.
    pub async fn limit_schedules(&self, budget: Option<usize>) {
        *self.schedule_budget.lock().await = budget;
    }

    pub async fn pending(&self) -> HashMap<String, (DateTime<Utc>, NotificationPayload)> {
        self.pending.lock().await.clone()
    }

    pub async fn calls(&self) -> Vec<SchedulerCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    async fn check(&self) -> Result<()> {
        if *self.failing.lock().await {
            bail!("notification scheduler rejected the request");
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationScheduler for RecordingScheduler {
    async fn cancel(&self, ids: &[String]) -> Result<()> {
        self.check().await?;
        let mut pending = self.pending.lock().await;
        for id in ids {
            pending.remove(id);
        }
        self.calls.lock().await.push(SchedulerCall::Cancel(ids.to_vec()));
        Ok(())
    }

    async fn schedule_one_shot(
        &self,
        id: &str,
        when: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<()> {
        self.check().await?;
        if let Some(budget) = self.schedule_budget.lock().await.as_mut() {
            if *budget == 0 {
                bail!("notification scheduler is full");
            }
            *budget -= 1;
        }
        self.pending
            .lock()
            .await
            .insert(id.to_string(), (when, payload));
        self.calls.lock().await.push(SchedulerCall::Schedule {
            id: id.to_string(),
            when,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dir: &str, name: &str, trigger: Option<DateTime<Utc>>) -> FileEntry {
        FileEntry {
            id: 0,
            directory: dir.to_string(),
            file_name: name.to_string(),
            content_preview: String::new(),
            vault: "v".to_string(),
            modified_at: DateTime::<Utc>::from(std::time::UNIX_EPOCH),
            triggers_at: trigger,
            repeats: None,
            stop_on: None,
        }
    }

    #[tokio::test]
    async fn filesystem_lists_direct_children_only() {
        let fs = MemoryFileSystem::new();
        let t = Utc::now();
        fs.add_file("/v/a.md", "a", t).await;
        fs.add_file("/v/sub/b.md", "b", t).await;

        let names: Vec<String> = fs
            .list_children("/v")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a.md", "sub"]);
        assert!(fs.stat("/v/sub").await.unwrap().is_directory);

        fs.fail_on("/v/sub").await;
        assert!(fs.list_children("/v/sub").await.is_err());
    }

    #[tokio::test]
    async fn filesystem_reads_prefix() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/v/a.md", "hello world", Utc::now()).await;
        assert_eq!(fs.read_prefix("/v/a.md", 5).await.unwrap(), "hello");
        assert!(fs.read_prefix("/v", 5).await.is_err());
    }

    #[tokio::test]
    async fn store_assigns_ids_and_orders_by_trigger() {
        let store = MemoryEntryStore::new();
        let later = Utc::now() + chrono::Duration::hours(2);
        let sooner = Utc::now() + chrono::Duration::hours(1);
        let stored = store
            .upsert(vec![
                EntryWrite::Insert(entry("/v", "a.md", Some(later))),
                EntryWrite::Insert(entry("/v", "b.md", Some(sooner))),
                EntryWrite::Insert(entry("/v", "c.md", None)),
            ])
            .await
            .unwrap();
        assert_eq!(stored.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let scheduled = store.select_all_with_trigger(10).await.unwrap();
        assert_eq!(
            scheduled.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![2, 1]
        );
        assert_eq!(store.select_all_with_trigger(1).await.unwrap().len(), 1);

        let removed = store
            .delete_not_matching("/v", &["a.md".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.select_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scheduler_replaces_per_id_and_can_fail() {
        let scheduler = RecordingScheduler::new();
        let payload = NotificationPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            vault: "v".to_string(),
            path: "t".to_string(),
        };
        let when = Utc::now();
        scheduler.schedule_one_shot("1", when, payload.clone()).await.unwrap();
        scheduler.schedule_one_shot("1", when, payload.clone()).await.unwrap();
        assert_eq!(scheduler.pending().await.len(), 1);

        scheduler.set_failing(true).await;
        assert!(scheduler.cancel(&["1".to_string()]).await.is_err());
        assert_eq!(scheduler.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn scheduler_budget_rejects_extra_schedules() {
        let scheduler = RecordingScheduler::new();
        let payload = NotificationPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            vault: "v".to_string(),
            path: "t".to_string(),
        };
        let when = Utc::now();
        scheduler.limit_schedules(Some(1)).await;
        scheduler.schedule_one_shot("1", when, payload.clone()).await.unwrap();
        assert!(scheduler.schedule_one_shot("2", when, payload.clone()).await.is_err());
        assert!(scheduler.cancel(&["1".to_string()]).await.is_ok());

        scheduler.limit_schedules(None).await;
        scheduler.schedule_one_shot("2", when, payload).await.unwrap();
        assert_eq!(scheduler.pending().await.len(), 1);
    }
}
