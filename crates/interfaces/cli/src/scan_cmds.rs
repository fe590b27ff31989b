use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tokio::sync::watch;

use vaultbell_config::AppConfig;
use vaultbell_runtime::{ScanService, scan_interval, spawn_delivery_loop, spawn_scan_loop};
use vaultbell_scanner::frontmatter::parse_date;
use vaultbell_scanner::{
    NotificationPayload, RecurrenceRule, ScanReport, ScanState, resolve,
};
use vaultbell_store::{DiagnosticLog, OutboxScheduler};

const DELIVERY_POLL: Duration = Duration::from_secs(30);

/// `<1s` as milliseconds, `<60s` as fractional seconds, otherwise minutes and
/// seconds.
pub(crate) fn human_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{:02}m {:02}s", secs / 60, secs % 60)
    }
}

fn local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn print_report(report: &ScanReport) {
    println!("vaultbell scan");
    println!("- duration: {}", human_duration(report.duration));
    println!(
        "- vaults: {}",
        if report.vaults.is_empty() {
            "(none found)".to_string()
        } else {
            report.vaults.join(", ")
        }
    );
    println!("- notes: {} seen, {} parsed", report.notes_seen, report.notes_parsed);
    println!("- deleted entries: {}", report.ids_deleted.len());
    println!("- notifications added: {}", report.notifications_to_add.len());
    println!("- notifications cancelled: {}", report.notifications_to_cancel.len());

    for command in &report.notifications_to_add {
        let Some(when) = command.entry.triggers_at else {
            continue;
        };
        let payload = NotificationPayload::for_entry(&command.entry);
        println!("  + {}  {}  {}", local(when), payload.title, payload.open_url());
    }
    for command in &report.notifications_to_cancel {
        println!("  - {}", command.entry.file_name);
    }

    if !report.issues.is_empty() {
        println!("- issues: {}", report.issues.len());
        for issue in &report.issues {
            println!("  ! {issue}");
        }
    }
}

pub(crate) async fn run_scan(config: &AppConfig, root: Option<String>) -> Result<()> {
    let service = ScanService::open(config)?;
    if let Some(root) = root {
        let mut state = service.load_state().await?;
        state.root_directory = root;
        service.save_state(&state).await?;
    }

    match service.try_scan(Local::now()).await? {
        Some(report) => print_report(&report),
        None => println!("a scan is already running"),
    }
    Ok(())
}

pub(crate) async fn run_watch(config: &AppConfig) -> Result<()> {
    let service = Arc::new(ScanService::open(config)?);
    let state = service.load_state().await?;
    let interval = scan_interval(state.scan_interval_minutes);
    tracing::info!(
        root = %state.root_directory,
        every = %human_duration(interval),
        "watching for reminders"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scans = spawn_scan_loop(service, interval, shutdown_rx.clone());
    let deliveries = spawn_delivery_loop(
        Arc::new(OutboxScheduler::new(config.outbox_path())),
        DELIVERY_POLL,
        shutdown_rx,
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = scans.await;
    let _ = deliveries.await;
    Ok(())
}

pub(crate) async fn run_upcoming(config: &AppConfig, limit: usize) -> Result<()> {
    let service = ScanService::open(config)?;
    let entries = service.entries().select_all_with_trigger(limit).await?;
    if entries.is_empty() {
        println!("no upcoming reminders");
        return Ok(());
    }

    println!("── upcoming reminders ───────────────────────────────");
    for entry in &entries {
        let Some(when) = entry.triggers_at else {
            continue;
        };
        let payload = NotificationPayload::for_entry(entry);
        let repeats = entry
            .repeats
            .as_deref()
            .map(|rule| format!("  ({rule})"))
            .unwrap_or_default();
        println!("  {}  {}/{}{repeats}", local(when), payload.vault, payload.path);
    }
    Ok(())
}

pub(crate) fn run_resolve(anchor: &str, rule: Option<&str>, stop: Option<&str>) -> Result<()> {
    let anchor = parse_date(anchor, &Local)
        .with_context(|| format!("unrecognised anchor date: {anchor}"))?;
    let stop = stop
        .map(|value| {
            parse_date(value, &Local).with_context(|| format!("unrecognised stop date: {value}"))
        })
        .transpose()?;
    let rule = rule.map(str::to_lowercase);
    let now = Local::now();

    println!("- now: {}", now.format("%Y-%m-%d %H:%M:%S %:z"));
    println!("- anchor: {}", anchor.format("%Y-%m-%d %H:%M:%S %:z"));
    if let Some(rule) = &rule {
        let parsed = RecurrenceRule::parse(rule);
        if parsed.is_recognized() {
            println!("- rule: {parsed:?}");
        } else {
            println!("- rule: not recognised, the reminder will not repeat");
        }
    }
    match resolve(&anchor, rule.as_deref(), stop.as_ref(), &now) {
        Some(next) => println!("- next trigger: {}", next.format("%Y-%m-%d %H:%M:%S %:z")),
        None => println!("- next trigger: none"),
    }
    Ok(())
}

fn print_state(state: &ScanState) {
    println!(
        "- root directory: {}",
        if state.root_directory.is_empty() {
            "(not set, use `vaultbell scan --root DIR`)"
        } else {
            state.root_directory.as_str()
        }
    );
    println!("- scan interval: {} minutes", state.scan_interval_minutes);
    println!("- vaults: {}", state.vaults.join(", "));
    println!(
        "- last scan: {}",
        state.last_scan_time.map(local).unwrap_or_else(|| "(never)".to_string())
    );
    if let Some(ms) = state.last_scan_duration_ms {
        println!("- last scan took: {}", human_duration(Duration::from_millis(ms)));
    }
    match &state.task_scan {
        Some(tasks) if tasks.enabled => {
            println!(
                "- task scan: on (start {}, scheduled {}, due {})",
                tasks.start_time.format("%H:%M"),
                tasks.scheduled_time.format("%H:%M"),
                tasks.due_time.format("%H:%M"),
            );
            if !tasks.restricted_subdirectory.is_empty() {
                println!("- task scan restricted to: {}", tasks.restricted_subdirectory);
            }
        }
        _ => println!("- task scan: off"),
    }
}

pub(crate) async fn run_status(config: &AppConfig) -> Result<()> {
    let service = ScanService::open(config)?;
    let state = service.load_state().await?;
    let stored = service.entries().select_all().await?;
    let pending = OutboxScheduler::new(config.outbox_path()).pending()?;

    println!("vaultbell status");
    println!("- data dir: {}", config.data_dir().display());
    print_state(&state);
    println!(
        "- notes catalogued: {} ({} with a trigger)",
        stored.len(),
        stored.iter().filter(|e| e.triggers_at.is_some()).count()
    );
    println!("- pending notifications: {}", pending.len());
    if let Some(next) = pending.first() {
        println!("- next notification: {} {}", local(next.when), next.payload.title);
    }
    Ok(())
}

pub(crate) async fn run_tasks(
    config: &AppConfig,
    enable: bool,
    disable: bool,
    restrict: Option<String>,
) -> Result<()> {
    let service = ScanService::open(config)?;
    let mut state = service.load_state().await?;
    let mut tasks = state.task_scan.clone().unwrap_or_else(|| config.tasks.clone());
    if enable {
        tasks.enabled = true;
    }
    if disable {
        tasks.enabled = false;
    }
    if let Some(dir) = restrict {
        tasks.restricted_subdirectory = dir;
    }
    state.task_scan = Some(tasks);
    service.save_state(&state).await?;

    println!("task scan settings updated");
    print_state(&state);
    Ok(())
}

pub(crate) async fn run_errors(config: &AppConfig, limit: usize) -> Result<()> {
    let log = DiagnosticLog::new(
        config.diagnostic_log_path(),
        config.telemetry.diagnostic_log_max_bytes,
    );
    let lines = log.tail(limit).await?;
    if lines.is_empty() {
        println!("no errors recorded");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
