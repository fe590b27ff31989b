//! Error types for a scan pass.

use thiserror::Error;

/// Failures that abort a whole pass.  Prior persisted state is left as it was
/// before the failing step.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("no root directory configured")]
    NotConfigured,

    #[error("root directory unavailable: {path}: {source}")]
    RootUnavailable {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("entry store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("failed to persist entries: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("notification scheduler rejected the change set: {0}")]
    Notification(#[source] anyhow::Error),
}

/// A transient failure on a single path.  The path (or its subtree) is
/// skipped and the pass carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
    pub path: String,
    pub message: String,
}

impl ScanIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ScanIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
