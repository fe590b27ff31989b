//! Size-bounded plain-text error log kept next to the entry database.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Share of the file dropped from the front once the ceiling is reached.
const TRUNCATE_FRACTION: u64 = 10;

#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    path: PathBuf,
    max_bytes: u64,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.  While the file would grow past the
    /// ceiling, roughly the oldest tenth of it is dropped, cutting at a line
    /// boundary.  A line longer than the ceiling on its own is shortened.
    pub async fn append(&self, at: DateTime<Utc>, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = format!(
            "{} {}\n",
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
            message.replace('\n', " ")
        );
        let limit = usize::try_from(self.max_bytes).unwrap_or(usize::MAX);
        if line.len() > limit {
            let mut end = limit.saturating_sub(1);
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
            line.push('\n');
        }

        let mut current = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };
        while current > 0 && current + line.len() as u64 > self.max_bytes {
            debug!(path = %self.path.display(), size = current, "diagnostic log over ceiling, truncating");
            current = self.drop_oldest(current).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Returns the new file size.
    async fn drop_oldest(&self, current: u64) -> Result<u64> {
        let contents = tokio::fs::read(&self.path).await?;
        let cut = (current / TRUNCATE_FRACTION).max(1) as usize - 1;
        let start = match contents.iter().skip(cut).position(|&b| b == b'\n') {
            Some(offset) => cut + offset + 1,
            None => contents.len(),
        };
        let kept = &contents[start.min(contents.len())..];
        tokio::fs::write(&self.path, kept).await?;
        Ok(kept.len() as u64)
    }

    /// The last `n` lines, oldest first.  A missing log reads as empty.
    pub async fn tail(&self, n: usize) -> Result<Vec<String>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let lines: Vec<&str> = raw.lines().collect();
        let skip = lines.len().saturating_sub(n);
        Ok(lines[skip..].iter().map(|s| s.to_string()).collect())
    }
}
