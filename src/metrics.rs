//! Host metric sampling.
//!
//! [`SysinfoSampler`] reads CPU, memory and root-disk usage through
//! `sysinfo`. Network latency and error rate are synthetic draws in the
//! same ranges the prediction model was trained on; the agent has no real
//! probe for them.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, System};

/// One snapshot of host metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSet {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    /// Milliseconds.
    pub net_latency: f64,
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSet {
    /// Feature order expected by the scoring model.
    pub fn features(&self) -> [f64; 5] {
        [
            self.cpu_pct,
            self.mem_pct,
            self.disk_pct,
            self.net_latency,
            self.error_rate,
        ]
    }
}

pub trait MetricsSource: Send + 'static {
    fn sample(&mut self) -> impl Future<Output = MetricSet> + Send;
}

/// Window over which CPU usage is averaged.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

pub struct SysinfoSampler {
    sys: System,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self { sys }
    }

    fn memory_percent(&self) -> f64 {
        percent(self.sys.used_memory(), self.sys.total_memory())
    }
}

impl MetricsSource for SysinfoSampler {
    async fn sample(&mut self) -> MetricSet {
        // Usage is a delta between two refreshes
        self.sys.refresh_cpu_usage();
        tokio::time::sleep(CPU_SAMPLE_WINDOW.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let mut rng = rand::rng();
        MetricSet {
            cpu_pct: self.sys.global_cpu_usage() as f64,
            mem_pct: self.memory_percent(),
            disk_pct: root_disk_percent(),
            net_latency: rng.random_range(1.0..10.0),
            error_rate: rng.random_range(0.0..0.05),
            timestamp: Utc::now(),
        }
    }
}

/// Used-space percentage of the root mount, or of the first disk when
/// there is no `/` (Windows).
fn root_disk_percent() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first());

    match disk {
        Some(disk) => {
            let total = disk.total_space();
            percent(total.saturating_sub(disk.available_space()), total)
        }
        None => 0.0,
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64) * 100.0
}
