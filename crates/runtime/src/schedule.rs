//! Background tasks for `vaultbell watch`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use vaultbell_store::OutboxScheduler;

use crate::service::ScanService;

/// Passes run at least this far apart, whatever the configured interval.
const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Scan interval for a configured number of minutes.
pub fn scan_interval(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60)).max(MIN_SCAN_INTERVAL)
}

/// Run a pass immediately and then every `interval` until `shutdown` flips to
/// `true`.  A tick that lands while a pass is still running is coalesced by
/// the service.
pub fn spawn_scan_loop(
    service: Arc<ScanService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match service.try_scan(Local::now()).await {
                        Ok(Some(report)) => info!(
                            added = report.notifications_to_add.len(),
                            cancelled = report.notifications_to_cancel.len(),
                            deleted = report.ids_deleted.len(),
                            "periodic scan finished"
                        ),
                        Ok(None) => debug!("periodic scan coalesced"),
                        Err(err) => warn!(error = %format!("{err:#}"), "periodic scan failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Poll the outbox and announce reminders whose time has come.
///
/// Delivery is a log line carrying the note's open link; desktop
/// notification daemons can follow the log file.
pub fn spawn_delivery_loop(
    outbox: Arc<OutboxScheduler>,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match outbox.take_due(Utc::now()) {
                        Ok(due) => {
                            for reminder in due {
                                info!(
                                    id = %reminder.id,
                                    title = %reminder.payload.title,
                                    body = %reminder.payload.body,
                                    url = %reminder.payload.open_url(),
                                    "reminder due"
                                );
                            }
                        }
                        Err(err) => warn!(?err, "failed to read notification outbox"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use vaultbell_config::AppConfig;
    use vaultbell_scanner::memory::{
        MemoryEntryStore, MemoryFileSystem, MemorySettingsStore, RecordingScheduler,
    };
    use vaultbell_scanner::{NotificationPayload, NotificationScheduler, SettingsStore};

    #[test]
    fn interval_has_a_floor() {
        assert_eq!(scan_interval(0), Duration::from_secs(60));
        assert_eq!(scan_interval(15), Duration::from_secs(900));
    }

    #[tokio::test]
    async fn scan_loop_runs_until_shutdown() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.add_dir("/notes/Brain/.obsidian", Utc::now()).await;
        let settings = Arc::new(MemorySettingsStore::new());
        let mut config = AppConfig::default();
        config.scan.root_directory = "/notes".to_string();
        let service = Arc::new(ScanService::new(
            config,
            fs,
            Arc::new(MemoryEntryStore::new()),
            Arc::new(RecordingScheduler::new()),
            settings.clone(),
        ));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_scan_loop(service, Duration::from_millis(20), rx);

        let mut scanned = false;
        for _ in 0..100 {
            if let Some(state) = settings.load().await.unwrap() {
                scanned = state.last_scan_time.is_some();
                if scanned {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(scanned);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn delivery_loop_drains_due_reminders() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Arc::new(OutboxScheduler::new(dir.path().join("notifications.json")));
        let payload = NotificationPayload {
            title: "call".to_string(),
            body: "Call mum".to_string(),
            vault: "Brain".to_string(),
            path: "call".to_string(),
        };
        outbox
            .schedule_one_shot("1", Utc::now() - ChronoDuration::minutes(1), payload.clone())
            .await
            .unwrap();
        outbox
            .schedule_one_shot("2", Utc::now() + ChronoDuration::days(1), payload)
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = spawn_delivery_loop(outbox.clone(), Duration::from_millis(10), rx);
        for _ in 0..100 {
            if outbox.pending().unwrap().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        let left = outbox.pending().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "2");
    }
}
