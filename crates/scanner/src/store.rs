//! Persistence collaborator contracts.

use anyhow::Result;
use async_trait::async_trait;

use crate::schema::{EntryWrite, FileEntry, ScanState};

/// Catalogue of known note files.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Entries whose `directory` equals `dir` exactly.
    async fn select_by_directory(&self, dir: &str) -> Result<Vec<FileEntry>>;

    async fn select_all(&self) -> Result<Vec<FileEntry>>;

    /// Entries with a trigger, soonest first, at most `limit` of them.
    async fn select_all_with_trigger(&self, limit: usize) -> Result<Vec<FileEntry>>;

    /// Apply inserts and id-keyed replacements, returning the stored rows.
    async fn upsert(&self, writes: Vec<EntryWrite>) -> Result<Vec<FileEntry>>;

    /// Returns how many rows were removed.
    async fn delete_by_ids(&self, ids: &[u64]) -> Result<usize>;

    /// Remove every entry in `dir` whose file name is not in `names_seen`.
    async fn delete_not_matching(&self, dir: &str, names_seen: &[String]) -> Result<usize>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<Option<ScanState>>;

    async fn save(&self, state: &ScanState) -> Result<()>;
}
