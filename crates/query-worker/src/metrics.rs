//! Resource usage sampling for heartbeats and the `status` action

use parking_lot::Mutex;
use query_flight::StatusReport;
use sysinfo::{Pid, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples system CPU, process memory and system memory usage
///
/// CPU usage is measured between two refreshes, so the very first sample
/// reports 0% and later ones cover the time since the previous sample.
pub struct MetricsCollector {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            tracing::warn!("Cannot determine own pid, process memory will read 0");
        }
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }

    /// Take a fresh sample, values rounded to two decimals
    pub fn sample(&self) -> StatusReport {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let process_bytes = match self.pid {
            Some(pid) => {
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                system.process(pid).map(|p| p.memory()).unwrap_or(0)
            }
            None => 0,
        };

        let total = system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };

        StatusReport::new(
            round2(system.global_cpu_usage() as f64),
            round2(process_bytes as f64 / BYTES_PER_MB),
            round2(memory_percent),
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).round() / 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(f64::NAN), 0.0);
    }

    #[test]
    fn test_sample_in_range() {
        let collector = MetricsCollector::new();
        collector.sample();
        let report = collector.sample();

        assert!((0.0..=100.0).contains(&report.memory_percent));
        assert!(report.cpu_percent >= 0.0);
        assert!(report.memory_mb > 0.0);

        // Survives the colon-delimited encoding
        let decoded: StatusReport = report.to_string().parse().unwrap();
        assert_eq!(decoded, report);
    }
}
