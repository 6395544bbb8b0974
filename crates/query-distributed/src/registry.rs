//! Registry of known workers
//!
//! Every mutation replaces the worker's record with a freshly built value.
//! Selection and the busy-marking that follows it happen under a single
//! write guard, so two jobs can never both claim the same idle worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::scheduler::choose_worker;
use crate::types::{now_millis, WorkerId, WorkerInfo, WorkerStatus};

/// In-memory map of registered workers
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerInfo>>,
    /// Maximum heartbeat age for placement
    staleness_window_ms: u64,
    next_generation: AtomicU64,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new(staleness_window_ms: u64) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            staleness_window_ms,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Heartbeat age beyond which a worker is not live
    pub fn staleness_window_ms(&self) -> u64 {
        self.staleness_window_ms
    }

    /// Register a worker, silently replacing any earlier registration with the same id
    ///
    /// Each registration gets a new generation, so leases taken against an
    /// earlier one no longer touch the record.
    pub fn register_worker(&self, id: WorkerId, address: &str, port: u16) -> WorkerInfo {
        let info = WorkerInfo {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            ..WorkerInfo::new(id.clone(), address, port, now_millis())
        };
        let previous = self.workers.write().insert(id.clone(), info.clone());

        if previous.is_some() {
            info!("Re-registered worker {} at {}:{}", id, address, port);
        } else {
            info!("Registered worker {} at {}:{}", id, address, port);
        }
        info
    }

    /// Remove a worker; returns whether it was registered
    pub fn unregister_worker(&self, id: &WorkerId) -> bool {
        let removed = self.workers.write().remove(id).is_some();
        if removed {
            info!("Unregistered worker {}", id);
        }
        removed
    }

    /// Record a heartbeat with fresh metrics
    ///
    /// Returns `false` for an unknown worker, whose heartbeat is dropped.
    pub fn update_worker_status(
        &self,
        id: &WorkerId,
        cpu_percent: f64,
        memory_mb: f64,
        memory_percent: f64,
    ) -> bool {
        self.update_worker_status_at(id, cpu_percent, memory_mb, memory_percent, now_millis())
    }

    /// [`update_worker_status`](Self::update_worker_status) at an explicit time
    pub fn update_worker_status_at(
        &self,
        id: &WorkerId,
        cpu_percent: f64,
        memory_mb: f64,
        memory_percent: f64,
        now: u64,
    ) -> bool {
        let mut workers = self.workers.write();
        let Some(current) = workers.get(id) else {
            return false;
        };

        let status = match current.status {
            WorkerStatus::Offline if current.active_jobs > 0 => WorkerStatus::Busy,
            WorkerStatus::Offline => {
                info!("Worker {} is back online", id);
                WorkerStatus::Idle
            }
            status => status,
        };

        let updated = WorkerInfo {
            status,
            cpu_percent,
            memory_mb,
            memory_percent,
            last_heartbeat: now,
            ..current.clone()
        };
        debug!(
            "Heartbeat from {}: cpu={}% mem={}MB ({}%)",
            id, cpu_percent, memory_mb, memory_percent
        );
        workers.insert(id.clone(), updated);
        true
    }

    /// Get worker info
    pub fn get_worker(&self, id: &WorkerId) -> Option<WorkerInfo> {
        self.workers.read().get(id).cloned()
    }

    /// List all workers, ordered by id
    pub fn list_workers(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self.workers.read().values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Get number of registered workers
    pub fn worker_count(&self) -> usize {
        self.workers.read().len()
    }

    /// Workers that are live and not offline at `now`
    pub fn online_count_at(&self, now: u64) -> usize {
        self.workers
            .read()
            .values()
            .filter(|w| w.status != WorkerStatus::Offline && w.is_live(now, self.staleness_window_ms))
            .count()
    }

    /// Best worker for a new job, without claiming it
    pub fn select_worker(&self) -> Option<WorkerInfo> {
        self.select_worker_at(now_millis())
    }

    /// [`select_worker`](Self::select_worker) at an explicit time
    pub fn select_worker_at(&self, now: u64) -> Option<WorkerInfo> {
        let workers = self.workers.read();
        choose_worker(workers.values(), now, self.staleness_window_ms).cloned()
    }

    /// Select a worker and mark it busy in one step
    ///
    /// The returned lease gives the worker back when it is completed or
    /// dropped, whatever happened to the job in between.
    pub fn reserve_worker(self: &Arc<Self>) -> Option<WorkerLease> {
        self.reserve_worker_at(now_millis())
    }

    /// [`reserve_worker`](Self::reserve_worker) at an explicit time
    pub fn reserve_worker_at(self: &Arc<Self>, now: u64) -> Option<WorkerLease> {
        let mut workers = self.workers.write();
        let chosen = choose_worker(workers.values(), now, self.staleness_window_ms)?;

        let active_jobs = chosen.active_jobs + 1;
        let reserved = WorkerInfo {
            status: chosen.status_for_load(active_jobs),
            active_jobs,
            ..chosen.clone()
        };
        workers.insert(reserved.id.clone(), reserved.clone());
        drop(workers);

        debug!(
            "Reserved worker {} ({} active jobs)",
            reserved.id, reserved.active_jobs
        );
        Some(WorkerLease {
            registry: Arc::clone(self),
            worker: reserved,
            released: false,
        })
    }

    /// Give a worker back after a job; `Some(bytes)` marks a successful job
    fn release_worker(&self, id: &WorkerId, generation: u64, completed_bytes: Option<u64>) {
        let mut workers = self.workers.write();
        let Some(current) = workers.get(id) else {
            debug!("Released worker {} is no longer registered", id);
            return;
        };
        if current.generation != generation {
            debug!(
                "Released worker {} has re-registered since it was reserved",
                id
            );
            return;
        }

        let active_jobs = current.active_jobs.saturating_sub(1);
        let (jobs_completed, bytes_processed) = match completed_bytes {
            Some(bytes) => (current.jobs_completed + 1, current.bytes_processed + bytes),
            None => (current.jobs_completed, current.bytes_processed),
        };

        let released = WorkerInfo {
            status: current.status_for_load(active_jobs),
            active_jobs,
            jobs_completed,
            bytes_processed,
            ..current.clone()
        };
        workers.insert(id.clone(), released);
    }

    /// Mark workers whose heartbeats went stale as offline
    ///
    /// Stale workers stay registered; a later heartbeat brings them back.
    /// Returns the ids that changed state.
    pub fn check_worker_health(&self) -> Vec<WorkerId> {
        self.check_worker_health_at(now_millis())
    }

    /// [`check_worker_health`](Self::check_worker_health) at an explicit time
    pub fn check_worker_health_at(&self, now: u64) -> Vec<WorkerId> {
        let mut workers = self.workers.write();
        let stale: Vec<WorkerId> = workers
            .values()
            .filter(|w| w.status != WorkerStatus::Offline && !w.is_live(now, self.staleness_window_ms))
            .map(|w| w.id.clone())
            .collect();

        for id in &stale {
            if let Some(current) = workers.get(id) {
                warn!(
                    "Worker {} is now offline (no heartbeat for {}ms)",
                    id,
                    current.heartbeat_age_ms(now)
                );
                let offline = WorkerInfo {
                    status: WorkerStatus::Offline,
                    ..current.clone()
                };
                workers.insert(id.clone(), offline);
            }
        }
        stale
    }

    /// Bytes processed by all registered workers
    pub fn total_bytes_processed(&self) -> u64 {
        self.workers.read().values().map(|w| w.bytes_processed).sum()
    }
}

/// A worker claimed for one job
///
/// Dropping the lease returns the worker without touching its counters;
/// [`complete`](Self::complete) returns it and records the finished job.
#[must_use = "dropping a lease releases the worker immediately"]
pub struct WorkerLease {
    registry: Arc<WorkerRegistry>,
    worker: WorkerInfo,
    released: bool,
}

impl WorkerLease {
    /// Snapshot of the worker taken when it was reserved
    pub fn worker(&self) -> &WorkerInfo {
        &self.worker
    }

    /// Release the worker and credit it with a finished job
    pub fn complete(mut self, bytes: u64) {
        self.registry
            .release_worker(&self.worker.id, self.worker.generation, Some(bytes));
        self.released = true;
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if !self.released {
            self.registry
                .release_worker(&self.worker.id, self.worker.generation, None);
        }
    }
}
