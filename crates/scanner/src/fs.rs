//! Filesystem collaborator used by the tree walker and the note reader.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

/// Metadata for one path, as returned by `stat` and `list_children`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Path token usable with the other [`FileSystem`] calls.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub is_directory: bool,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn stat(&self, path: &str) -> Result<FileStat>;

    async fn list_children(&self, dir: &str) -> Result<Vec<FileStat>>;

    /// Read at most `max_bytes` from the start of the file.  A multi-byte
    /// character cut by the limit is replaced, never an error.
    async fn read_prefix(&self, path: &str, max_bytes: usize) -> Result<String>;
}

/// [`FileSystem`] over the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, path: &str) -> Result<FileStat> {
        let canonical = tokio::fs::canonicalize(path)
            .await
            .with_context(|| format!("resolving {path}"))?;
        let metadata = tokio::fs::metadata(&canonical)
            .await
            .with_context(|| format!("stat {}", canonical.display()))?;
        Ok(to_stat(&canonical, &metadata))
    }

    async fn list_children(&self, dir: &str) -> Result<Vec<FileStat>> {
        let mut reader = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("listing {dir}"))?;
        let mut children = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            // Symlinks are reported as-is and never followed.
            match entry.metadata().await {
                Ok(metadata) => children.push(to_stat(&path, &metadata)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable child");
                }
            }
        }
        children.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(children)
    }

    async fn read_prefix(&self, path: &str, max_bytes: usize) -> Result<String> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {path}"))?;
        let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
        file.take(max_bytes as u64)
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("reading {path}"))?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn to_stat(path: &Path, metadata: &std::fs::Metadata) -> FileStat {
    let last_modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
    FileStat {
        path: path.to_string_lossy().into_owned(),
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        is_directory: metadata.is_dir(),
        last_modified,
    }
}
