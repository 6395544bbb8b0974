//! Coordinator node for the query cluster
//!
//! The coordinator is a single owned object: the worker registry, the job
//! table and the executor all hang off it, and every Flight action is a
//! method call on it. There is no process-wide state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use query_flight::QueryOutput;
use tokio::task::JoinHandle;

use crate::error::{DistributedError, Result};
use crate::executor::JobExecutor;
use crate::flight_transport::{FlightTransport, WorkerTransport};
use crate::jobs::JobTable;
use crate::registry::WorkerRegistry;
use crate::types::{
    now_millis, ClusterStatus, Job, JobId, JobStatus, SchedulerConfig, WorkerId, WorkerInfo,
};

/// Coordinator node that tracks workers and runs jobs on them
pub struct Coordinator {
    registry: Arc<WorkerRegistry>,
    jobs: Arc<JobTable>,
    executor: Arc<JobExecutor>,
    config: SchedulerConfig,
    started_at: Instant,
}

impl Coordinator {
    /// Create a coordinator that reaches workers through `transport`
    pub fn new(config: SchedulerConfig, transport: Arc<dyn WorkerTransport>) -> Self {
        let registry = Arc::new(WorkerRegistry::new(config.staleness_window_ms));
        let jobs = Arc::new(JobTable::new());
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&jobs),
            transport,
            &config,
        ));

        Self {
            registry,
            jobs,
            executor,
            config,
            started_at: Instant::now(),
        }
    }

    /// Create a coordinator that talks Arrow Flight to its workers
    pub fn with_flight_transport(config: SchedulerConfig) -> Self {
        Self::new(config, Arc::new(FlightTransport::new()))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Shared handle to the worker registry
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Register a worker node, replacing any earlier record with the same id
    pub fn register_worker(&self, id: WorkerId, address: &str, port: u16) -> WorkerInfo {
        self.registry.register_worker(id, address, port)
    }

    /// Unregister a worker node; unknown ids are ignored
    pub fn unregister_worker(&self, id: &WorkerId) -> bool {
        self.registry.unregister_worker(id)
    }

    /// Record a worker heartbeat; returns `false` if the worker is unknown
    pub fn worker_heartbeat(
        &self,
        id: &WorkerId,
        cpu_percent: f64,
        memory_mb: f64,
        memory_percent: f64,
    ) -> bool {
        let known = self
            .registry
            .update_worker_status(id, cpu_percent, memory_mb, memory_percent);
        if !known {
            tracing::debug!("Ignoring heartbeat from unknown worker {}", id);
        }
        known
    }

    /// Get worker info
    pub fn get_worker(&self, id: &WorkerId) -> Option<WorkerInfo> {
        self.registry.get_worker(id)
    }

    /// List all workers
    pub fn list_workers(&self) -> Vec<WorkerInfo> {
        self.registry.list_workers()
    }

    /// Pick the worker the next job would go to
    pub fn select_worker(&self) -> Result<WorkerInfo> {
        self.registry
            .select_worker()
            .ok_or(DistributedError::NoWorkersAvailable)
    }

    /// Submit SQL for execution and return the new job id immediately
    pub fn submit_job(&self, sql: &str) -> Result<JobId> {
        self.executor.submit(sql)
    }

    /// Cancel a pending or running job
    pub fn cancel_job(&self, id: &JobId) -> bool {
        self.executor.cancel(id)
    }

    /// Get job status
    pub fn get_job(&self, id: &JobId) -> Option<Job> {
        self.jobs.get(id)
    }

    /// List all jobs, oldest first
    pub fn list_jobs(&self) -> Vec<Job> {
        self.jobs.list()
    }

    /// Result data of a completed job
    pub fn job_result(&self, id: &JobId) -> Result<Arc<QueryOutput>> {
        let job = self
            .jobs
            .get(id)
            .ok_or_else(|| DistributedError::JobNotFound(id.to_string()))?;

        match (job.status, job.result) {
            (JobStatus::Completed, Some(result)) => Ok(result),
            (status, _) => Err(DistributedError::JobNotCompleted {
                id: id.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Get cluster status
    pub fn cluster_status(&self) -> ClusterStatus {
        let workers = self.registry.list_workers();

        ClusterStatus {
            online_workers: self.registry.online_count_at(now_millis()),
            total_workers: workers.len(),
            active_jobs: self.jobs.active_count(),
            completed_jobs: self.jobs.count(JobStatus::Completed),
            failed_jobs: self.jobs.count(JobStatus::Failed),
            total_bytes_processed: self.registry.total_bytes_processed(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            workers,
        }
    }

    /// Mark workers with stale heartbeats offline
    pub fn check_worker_health(&self) -> Vec<WorkerId> {
        self.registry.check_worker_health()
    }

    /// Sweep stale workers periodically until the returned task is aborted
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let period = Duration::from_millis(self.config.health_check_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.check_worker_health();
            }
        })
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::with_flight_transport(SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{BlockingTransport, FailingTransport, StaticTransport};
    use crate::types::{WorkerStatus, CANCELLED_BY_USER, NO_WORKERS_AVAILABLE};
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;

    fn coordinator(transport: Arc<dyn WorkerTransport>) -> Coordinator {
        Coordinator::new(SchedulerConfig::default(), transport)
    }

    async fn wait_for(coordinator: &Coordinator, id: &JobId, done: impl Fn(&Job) -> bool) -> Job {
        for _ in 0..300 {
            let job = coordinator.get_job(id).unwrap();
            // The driver releases its worker just after the final transition
            if done(&job) && coordinator.executor.in_flight() == 0 {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached the expected state", id);
    }

    #[tokio::test]
    async fn test_submit_completes_on_worker() {
        let transport = Arc::new(StaticTransport::default());
        let coordinator = coordinator(transport.clone());
        coordinator.register_worker(WorkerId::from("w1"), "localhost", 9000);

        let id = coordinator.submit_job("SELECT 1").unwrap();
        let pending = coordinator.get_job(&id).unwrap();
        assert_eq!(pending.sql, "SELECT 1");

        let job = wait_for(&coordinator, &id, |j| j.status.is_terminal()).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.worker_id, Some(WorkerId::from("w1")));
        assert_eq!(job.rows_processed, 1);
        assert_eq!(job.progress, 1.0);
        assert!(job.started_at.is_some() && job.completed_at.is_some());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let result = coordinator.job_result(&id).unwrap();
        assert_eq!(result.total_rows, 1);

        let worker = coordinator.get_worker(&WorkerId::from("w1")).unwrap();
        assert_eq!(worker.status, WorkerStatus::Idle);
        assert_eq!(worker.jobs_completed, 1);
        assert_eq!(worker.bytes_processed, job.bytes_processed);
    }

    #[tokio::test]
    async fn test_no_workers_fails_job() {
        let coordinator = coordinator(Arc::new(StaticTransport::default()));
        let id = coordinator.submit_job("SELECT 1").unwrap();

        let job = wait_for(&coordinator, &id, |j| j.status.is_terminal()).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(NO_WORKERS_AVAILABLE));
        assert!(job.worker_id.is_none());
        assert!(matches!(
            coordinator.select_worker(),
            Err(DistributedError::NoWorkersAvailable)
        ));
    }

    #[tokio::test]
    async fn test_worker_back_to_idle_after_failed_job() {
        let coordinator = coordinator(Arc::new(FailingTransport(
            "Error during planning: table 'missing' not found".to_string(),
        )));
        coordinator.register_worker(WorkerId::from("w1"), "localhost", 9000);

        let id = coordinator.submit_job("SELECT * FROM missing").unwrap();
        let job = wait_for(&coordinator, &id, |j| j.status.is_terminal()).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_deref(),
            Some("Error during planning: table 'missing' not found")
        );

        let worker = coordinator.get_worker(&WorkerId::from("w1")).unwrap();
        assert_eq!(worker.status, WorkerStatus::Idle);
        assert_eq!(worker.active_jobs, 0);
        assert_eq!(worker.jobs_completed, 0);

        assert!(matches!(
            coordinator.job_result(&id),
            Err(DistributedError::JobNotCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let transport = Arc::new(BlockingTransport::default());
        let coordinator = coordinator(transport.clone());
        coordinator.register_worker(WorkerId::from("w1"), "localhost", 9000);

        let id = coordinator.submit_job("SELECT 1").unwrap();
        transport.started.notified().await;
        let running = coordinator.get_job(&id).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(
            coordinator.get_worker(&WorkerId::from("w1")).unwrap().status,
            WorkerStatus::Busy
        );

        assert!(coordinator.cancel_job(&id));
        assert!(!coordinator.cancel_job(&id));

        let job = coordinator.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error.as_deref(), Some(CANCELLED_BY_USER));

        for _ in 0..300 {
            let worker = coordinator.get_worker(&WorkerId::from("w1")).unwrap();
            if worker.status == WorkerStatus::Idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker was not released after cancellation");
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_finished() {
        let coordinator = coordinator(Arc::new(StaticTransport::default()));
        assert!(!coordinator.cancel_job(&JobId::from("000000000000")));

        let id = coordinator.submit_job("SELECT 1").unwrap();
        wait_for(&coordinator, &id, |j| j.status.is_terminal()).await;
        assert!(!coordinator.cancel_job(&id));
        assert_eq!(coordinator.get_job(&id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_job_ids_unique() {
        let coordinator = coordinator(Arc::new(StaticTransport::default()));
        coordinator.register_worker(WorkerId::from("w1"), "localhost", 9000);

        let ids: HashSet<JobId> = (0..100)
            .map(|i| coordinator.submit_job(&format!("SELECT {}", i)).unwrap())
            .collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| id.as_str().len() == JobId::LEN));
        assert_eq!(coordinator.list_jobs().len(), 100);
    }

    #[tokio::test]
    async fn test_cluster_status() {
        let coordinator = coordinator(Arc::new(StaticTransport::default()));
        coordinator.register_worker(WorkerId::from("w1"), "localhost", 9000);
        coordinator.register_worker(WorkerId::from("w2"), "localhost", 9001);
        assert!(coordinator.worker_heartbeat(&WorkerId::from("w2"), 40.0, 128.0, 12.0));
        assert!(!coordinator.worker_heartbeat(&WorkerId::from("ghost"), 1.0, 1.0, 1.0));

        let id = coordinator.submit_job("SELECT 1").unwrap();
        wait_for(&coordinator, &id, |j| j.status.is_terminal()).await;

        let status = coordinator.cluster_status();
        assert_eq!(status.total_workers, 2);
        assert_eq!(status.online_workers, 2);
        assert_eq!(status.completed_jobs, 1);
        assert_eq!(status.failed_jobs, 0);
        assert_eq!(status.active_jobs, 0);
        assert!(status.total_bytes_processed > 0);
        assert_eq!(status.workers[0].id, WorkerId::from("w1"));

        assert!(coordinator.unregister_worker(&WorkerId::from("w2")));
        assert_eq!(coordinator.cluster_status().total_workers, 1);
    }
}
