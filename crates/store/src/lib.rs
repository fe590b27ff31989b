//! On-disk collaborators for the scan pipeline.

pub mod diagnostics;
pub mod entries;
pub mod outbox;
pub mod settings;

pub use diagnostics::DiagnosticLog;
pub use entries::RedbEntryStore;
pub use outbox::{OutboxScheduler, PendingNotification};
pub use settings::JsonSettingsStore;
