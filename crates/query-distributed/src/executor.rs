//! Job executor
//!
//! Drives each submitted job through its lifecycle on a background task:
//! pending, running, placed on a worker, then completed, failed or
//! cancelled. Remote execution runs under a deadline and races the job's
//! cancellation signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use query_flight::QueryOutput;
use tokio::sync::Notify;

use crate::error::{DistributedError, Result};
use crate::flight_transport::WorkerTransport;
use crate::jobs::JobTable;
use crate::registry::{WorkerLease, WorkerRegistry};
use crate::types::{now_millis, JobId, SchedulerConfig, NO_WORKERS_AVAILABLE};

/// Runs jobs against workers picked from the registry
pub struct JobExecutor {
    registry: Arc<WorkerRegistry>,
    jobs: Arc<JobTable>,
    transport: Arc<dyn WorkerTransport>,
    /// Deadline for one remote execute call
    execute_timeout: Duration,
    /// Wake-up signals for jobs that have not finished yet
    cancellations: DashMap<JobId, Arc<Notify>>,
}

impl JobExecutor {
    /// Create a new executor
    pub fn new(
        registry: Arc<WorkerRegistry>,
        jobs: Arc<JobTable>,
        transport: Arc<dyn WorkerTransport>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            jobs,
            transport,
            execute_timeout: Duration::from_millis(config.execute_timeout_ms),
            cancellations: DashMap::new(),
        }
    }

    /// Accept a job and start driving it in the background
    ///
    /// Returns as soon as the job is recorded as pending; must be called
    /// from within a Tokio runtime.
    pub fn submit(self: &Arc<Self>, sql: &str) -> Result<JobId> {
        if sql.trim().is_empty() {
            return Err(DistributedError::EmptyQuery);
        }

        let job = self.jobs.insert_new(sql);
        let signal = Arc::new(Notify::new());
        self.cancellations.insert(job.id.clone(), Arc::clone(&signal));
        tracing::info!("Submitted job {}", job.id);

        let executor = Arc::clone(self);
        let id = job.id.clone();
        tokio::spawn(async move {
            executor.run_job(&id, &signal).await;
            executor.cancellations.remove(&id);
        });

        Ok(job.id)
    }

    /// Cancel a pending or running job
    ///
    /// Returns `false` if the job is unknown or already finished.
    pub fn cancel(&self, id: &JobId) -> bool {
        if self
            .jobs
            .transition(id, |job| job.cancelled(now_millis()))
            .is_none()
        {
            return false;
        }

        let signal = self.cancellations.get(id).map(|s| Arc::clone(s.value()));
        if let Some(signal) = signal {
            // Stores a permit if the driver is not waiting yet
            signal.notify_one();
        }
        tracing::info!("Cancelled job {}", id);
        true
    }

    /// Number of jobs whose driver has not returned yet
    pub fn in_flight(&self) -> usize {
        self.cancellations.len()
    }

    async fn run_job(&self, id: &JobId, cancel: &Notify) {
        let Some(job) = self.jobs.transition(id, |job| job.running(now_millis())) else {
            tracing::debug!("Job {} was cancelled before it started", id);
            return;
        };

        let Some(lease) = self.registry.reserve_worker() else {
            tracing::warn!("Job {} failed: {}", id, NO_WORKERS_AVAILABLE);
            self.jobs
                .transition(id, |job| job.failed(NO_WORKERS_AVAILABLE, now_millis()));
            return;
        };

        let worker = lease.worker().clone();
        if self
            .jobs
            .transition(id, |job| job.assigned(worker.id.clone()))
            .is_none()
        {
            tracing::debug!("Job {} was cancelled before dispatch", id);
            return;
        }
        tracing::info!(
            "Job {} assigned to worker {} at {}",
            id,
            worker.id,
            worker.endpoint()
        );

        let start = Instant::now();
        let execute = tokio::time::timeout(
            self.execute_timeout,
            self.transport.execute(&worker, &job.sql),
        );

        let outcome = tokio::select! {
            result = execute => match result {
                Ok(result) => result,
                Err(_) => Err(DistributedError::TaskTimeout(self.execute_timeout.as_millis() as u64)),
            },
            _ = cancel.notified() => {
                tracing::info!("Abandoned job {} on worker {} after cancellation", id, worker.id);
                return;
            }
        };

        match outcome {
            Ok(output) => {
                let rows = output.total_rows;
                let bytes = output.total_bytes;
                if self.record_success(id, lease, output) {
                    tracing::info!(
                        "Job {} completed on worker {}: {} rows, {} bytes in {:?}",
                        id,
                        worker.id,
                        rows,
                        bytes,
                        start.elapsed()
                    );
                } else {
                    tracing::debug!("Discarding result of cancelled job {}", id);
                }
            }
            Err(e) => {
                tracing::warn!("Job {} failed on worker {}: {}", id, worker.id, e);
                drop(lease);
                let message = e.to_string();
                self.jobs
                    .transition(id, move |job| job.failed(message, now_millis()));
            }
        }
    }

    /// Store a worker's result unless the job finished in the meantime
    ///
    /// The worker is credited only together with the completed record;
    /// otherwise the lease is just released. Returns whether it was stored.
    fn record_success(&self, id: &JobId, lease: WorkerLease, output: QueryOutput) -> bool {
        let bytes = output.total_bytes as u64;
        let output = Arc::new(output);
        self.jobs
            .transition(id, move |job| {
                // Free the worker before the job is visible as completed
                lease.complete(bytes);
                job.completed(output, now_millis())
            })
            .is_some()
    }
}

/// Transports standing in for real workers in unit tests
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use async_trait::async_trait;
    use query_flight::QueryOutput;
    use tokio::sync::Notify;

    use crate::error::{DistributedError, Result};
    use crate::flight_transport::WorkerTransport;
    use crate::types::WorkerInfo;

    pub fn one_row_output() -> QueryOutput {
        let schema = Arc::new(Schema::new(vec![Field::new("1", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1]))])
                .unwrap();
        QueryOutput::new(schema, vec![batch])
    }

    /// Answers every query with a single row
    #[derive(Default)]
    pub struct StaticTransport {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkerTransport for StaticTransport {
        async fn execute(&self, _worker: &WorkerInfo, _sql: &str) -> Result<QueryOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(one_row_output())
        }
    }

    /// Fails every query with the given engine message
    pub struct FailingTransport(pub String);

    #[async_trait]
    impl WorkerTransport for FailingTransport {
        async fn execute(&self, _worker: &WorkerInfo, _sql: &str) -> Result<QueryOutput> {
            Err(DistributedError::RemoteExecution(self.0.clone()))
        }
    }

    /// Never answers; signals once a call is in flight
    #[derive(Default)]
    pub struct BlockingTransport {
        pub started: Notify,
    }

    #[async_trait]
    impl WorkerTransport for BlockingTransport {
        async fn execute(&self, _worker: &WorkerInfo, _sql: &str) -> Result<QueryOutput> {
            self.started.notify_one();
            std::future::pending().await
        }
    }
}
