//! Single-flight wrapper around a scan pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use vaultbell_config::AppConfig;
use vaultbell_scanner::{
    EntryStore, FileSystem, LocalFileSystem, NotificationScheduler, ScanReport, ScanState,
    Scanner, SettingsStore,
};
use vaultbell_store::{DiagnosticLog, JsonSettingsStore, OutboxScheduler, RedbEntryStore};

/// Owns the collaborators of the scan pipeline and makes sure at most one
/// pass runs at a time.
pub struct ScanService {
    config: AppConfig,
    fs: Arc<dyn FileSystem>,
    store: Arc<dyn EntryStore>,
    scheduler: Arc<dyn NotificationScheduler>,
    settings: Arc<dyn SettingsStore>,
    diagnostics: Option<DiagnosticLog>,
    in_progress: AtomicBool,
}

/// Clears the in-progress flag when the pass ends, even on early return.
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScanService {
    pub fn new(
        config: AppConfig,
        fs: Arc<dyn FileSystem>,
        store: Arc<dyn EntryStore>,
        scheduler: Arc<dyn NotificationScheduler>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            config,
            fs,
            store,
            scheduler,
            settings,
            diagnostics: None,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn with_diagnostics(mut self, log: DiagnosticLog) -> Self {
        self.diagnostics = Some(log);
        self
    }

    /// Wire the on-disk collaborators under `config.storage.data_dir`.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let store = RedbEntryStore::open(config.entries_db_path())
            .context("failed to open entry store")?;
        let diagnostics = DiagnosticLog::new(
            config.diagnostic_log_path(),
            config.telemetry.diagnostic_log_max_bytes,
        );
        Ok(Self::new(
            config.clone(),
            Arc::new(LocalFileSystem),
            Arc::new(store),
            Arc::new(OutboxScheduler::new(config.outbox_path())),
            Arc::new(JsonSettingsStore::new(config.state_path())),
        )
        .with_diagnostics(diagnostics))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn entries(&self) -> &dyn EntryStore {
        self.store.as_ref()
    }

    pub fn diagnostics(&self) -> Option<&DiagnosticLog> {
        self.diagnostics.as_ref()
    }

    pub fn is_scanning(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Persisted state, or a fresh one seeded from the config on first run.
    pub async fn load_state(&self) -> Result<ScanState> {
        Ok(self
            .settings
            .load()
            .await
            .context("failed to load scan state")?
            .unwrap_or_else(|| ScanState::from_config(&self.config)))
    }

    pub async fn save_state(&self, state: &ScanState) -> Result<()> {
        self.settings
            .save(state)
            .await
            .context("failed to save scan state")
    }

    /// Run one pass unless another is already running, in which case the
    /// request is dropped and `Ok(None)` returned.
    pub async fn try_scan<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Result<Option<ScanReport>> {
        let Some(_guard) = ScanGuard::acquire(&self.in_progress) else {
            info!("scan already in progress, skipping");
            return Ok(None);
        };

        let at = now.with_timezone(&Utc);
        let mut state = match self.load_state().await {
            Ok(state) => state,
            Err(err) => {
                self.record(at, &format!("{err:#}")).await;
                return Err(err);
            }
        };

        let scanner = Scanner::new(self.fs.as_ref(), self.store.as_ref(), self.scheduler.as_ref())
            .with_config(&self.config.scan);
        let report = match scanner.run(&mut state, now).await {
            Ok(report) => report,
            Err(err) => {
                self.record(at, &format!("scan failed: {err}")).await;
                return Err(err.into());
            }
        };

        for issue in &report.issues {
            self.record(at, &issue.to_string()).await;
        }
        if let Err(err) = self.save_state(&state).await {
            warn!(error = %format!("{err:#}"), "scan state not saved");
            self.record(at, &format!("{err:#}")).await;
        }
        Ok(Some(report))
    }

    async fn record(&self, at: DateTime<Utc>, message: &str) {
        let Some(log) = &self.diagnostics else {
            return;
        };
        if let Err(err) = log.append(at, message).await {
            warn!(?err, "failed to write diagnostic log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vaultbell_scanner::memory::{
        MemoryEntryStore, MemoryFileSystem, MemorySettingsStore, RecordingScheduler,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap()
    }

    struct Harness {
        fs: Arc<MemoryFileSystem>,
        scheduler: Arc<RecordingScheduler>,
        settings: Arc<MemorySettingsStore>,
        service: ScanService,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.add_dir("/notes/Brain/.obsidian", now()).await;
        fs.add_file(
            "/notes/Brain/call.md",
            "---\nremind at: 2024-03-21 10:00\n---\nCall mum\n",
            now() - Duration::days(1),
        )
        .await;

        let mut config = AppConfig::default();
        config.scan.root_directory = "/notes".to_string();
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(RecordingScheduler::new());
        let settings = Arc::new(MemorySettingsStore::new());
        let service = ScanService::new(
            config,
            fs.clone(),
            Arc::new(MemoryEntryStore::new()),
            scheduler.clone(),
            settings.clone(),
        )
        .with_diagnostics(DiagnosticLog::new(dir.path().join("errors.log"), 4096));

        Harness {
            fs,
            scheduler,
            settings,
            service,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn first_scan_seeds_and_saves_state() {
        let h = harness().await;
        let report = h.service.try_scan(now()).await.unwrap().unwrap();

        assert_eq!(report.notifications_to_add.len(), 1);
        let saved = h.settings.load().await.unwrap().unwrap();
        assert_eq!(saved.root_directory, "/notes");
        assert_eq!(saved.vaults, vec!["Brain"]);
        assert_eq!(saved.last_scan_time, Some(now()));
        assert!(!h.service.is_scanning());
    }

    #[tokio::test]
    async fn overlapping_request_is_coalesced() {
        let h = harness().await;
        let _running = ScanGuard::acquire(&h.service.in_progress).unwrap();

        assert!(h.service.try_scan(now()).await.unwrap().is_none());
        assert!(h.scheduler.calls().await.is_empty());
        assert!(h.settings.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn guard_is_released_after_a_failed_pass() {
        let h = harness().await;
        h.scheduler.set_failing(true).await;

        assert!(h.service.try_scan(now()).await.is_err());
        assert!(!h.service.is_scanning());
        assert!(h.settings.load().await.unwrap().is_none());

        let lines = h.service.diagnostics().unwrap().tail(10).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("notification scheduler rejected"));

        h.scheduler.set_failing(false).await;
        assert!(h.service.try_scan(now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transient_issues_reach_the_diagnostic_log() {
        let h = harness().await;
        h.fs.add_file("/notes/Brain/sub/x.md", "x", now()).await;
        h.fs.fail_on("/notes/Brain/sub").await;

        let report = h.service.try_scan(now()).await.unwrap().unwrap();
        assert_eq!(report.issues.len(), 1);

        let lines = h.service.diagnostics().unwrap().tail(10).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("/notes/Brain/sub"));
    }
}
