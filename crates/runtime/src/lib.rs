//! Long-running side of vaultbell: single-flight scans and the periodic loop.

pub mod schedule;
pub mod service;

pub use schedule::{scan_interval, spawn_delivery_loop, spawn_scan_loop};
pub use service::ScanService;
