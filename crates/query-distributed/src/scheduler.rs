//! Worker placement policy
//!
//! Placement is a cheap greedy balancer: among live workers prefer idle ones,
//! fall back to any worker that is not offline, and pick the lowest reported
//! CPU usage. No coordination between workers is needed.

use std::cmp::Ordering;

use crate::types::{WorkerInfo, WorkerStatus};

/// Choose the best worker for a new job
///
/// Candidates are workers that are `idle` and live (heartbeat younger than
/// `window_ms`). If there are none, any live worker that is not `offline` is
/// considered. The lowest `cpu_percent` wins; ties go to the smallest worker
/// id. The tie-break is an implementation detail that callers must not rely
/// on.
pub fn choose_worker<'a, I>(workers: I, now: u64, window_ms: u64) -> Option<&'a WorkerInfo>
where
    I: IntoIterator<Item = &'a WorkerInfo>,
{
    let live: Vec<&WorkerInfo> = workers
        .into_iter()
        .filter(|w| w.status != WorkerStatus::Offline && w.is_live(now, window_ms))
        .collect();

    let idle = live
        .iter()
        .copied()
        .filter(|w| w.status == WorkerStatus::Idle);

    least_loaded(idle).or_else(|| least_loaded(live.iter().copied()))
}

fn least_loaded<'a>(candidates: impl Iterator<Item = &'a WorkerInfo>) -> Option<&'a WorkerInfo> {
    candidates.min_by(|a, b| compare_load(a, b))
}

fn compare_load(a: &WorkerInfo, b: &WorkerInfo) -> Ordering {
    a.cpu_percent
        .total_cmp(&b.cpu_percent)
        .then_with(|| a.id.cmp(&b.id))
}
