//! Scan-parse-resolve-reconcile pipeline that turns reminder metadata in
//! vault notes into one-shot notification commands.

pub mod error;
pub mod frontmatter;
pub mod fs;
pub mod memory;
pub mod notify;
pub mod reconcile;
pub mod recurrence;
pub mod scan;
pub mod schema;
pub mod store;
pub mod tasks;
pub mod trigger;
pub mod vault;
pub mod walker;

pub use error::{ScanError, ScanIssue};
pub use fs::{FileStat, FileSystem, LocalFileSystem};
pub use notify::{NotificationPayload, NotificationScheduler};
pub use recurrence::{MonthDay, RecurrenceRule, TimeUnit, resolve};
pub use scan::{ScanLimits, ScanReport, Scanner};
pub use schema::{CommandKind, EntryWrite, FileEntry, NotificationCommand, ScanState};
pub use store::{EntryStore, SettingsStore};
