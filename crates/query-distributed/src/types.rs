//! Core types for the coordinator

use std::fmt;
use std::sync::Arc;

use query_flight::{FlightEndpoint, QueryOutput};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier a worker chooses for itself when it registers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Short token identifying a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Length of a generated id in hex characters
    pub const LEN: usize = 12;

    /// Draw a new random id
    ///
    /// Uniqueness is enforced by the job table, which draws again on collision.
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(hex[..Self::LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Status of a worker node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Registered with no job placed on it
    Idle,
    /// Executing at least one job
    Busy,
    /// Heartbeats stopped arriving
    Offline,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Information about a registered worker
///
/// Records are never edited in place: every change builds a new value that
/// replaces the old one in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    /// Host the coordinator dials back
    pub address: String,
    pub port: u16,
    pub status: WorkerStatus,
    /// Last reported system CPU utilisation, percent
    pub cpu_percent: f64,
    /// Last reported process memory, MiB
    pub memory_mb: f64,
    /// Last reported system memory utilisation, percent
    pub memory_percent: f64,
    /// Unix millis of the latest heartbeat or registration
    pub last_heartbeat: u64,
    /// Jobs currently placed on this worker
    pub active_jobs: usize,
    pub jobs_completed: u64,
    pub bytes_processed: u64,
    /// Bumped by the registry on every registration of this id
    #[serde(default)]
    pub generation: u64,
}

impl WorkerInfo {
    /// Fresh record for a worker that just registered
    pub fn new(id: WorkerId, address: impl Into<String>, port: u16, now: u64) -> Self {
        Self {
            id,
            address: address.into(),
            port,
            status: WorkerStatus::Idle,
            cpu_percent: 0.0,
            memory_mb: 0.0,
            memory_percent: 0.0,
            last_heartbeat: now,
            active_jobs: 0,
            jobs_completed: 0,
            bytes_processed: 0,
            generation: 0,
        }
    }

    /// Whether a heartbeat arrived within `window_ms` of `now`
    pub fn is_live(&self, now: u64, window_ms: u64) -> bool {
        now.saturating_sub(self.last_heartbeat) < window_ms
    }

    /// Milliseconds since the last heartbeat
    pub fn heartbeat_age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_heartbeat)
    }

    /// Flight endpoint serving this worker's queries
    pub fn endpoint(&self) -> FlightEndpoint {
        FlightEndpoint::new(self.address.clone(), self.port)
    }

    /// Status implied by the job count, keeping `Offline` sticky
    pub(crate) fn status_for_load(&self, active_jobs: usize) -> WorkerStatus {
        match (self.status, active_jobs) {
            (WorkerStatus::Offline, _) => WorkerStatus::Offline,
            (_, 0) => WorkerStatus::Idle,
            _ => WorkerStatus::Busy,
        }
    }
}

/// Status of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states accept no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One submitted query
///
/// Transition methods take `&self` and return a brand new record; the job
/// table swaps it in whole so readers always see a consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub sql: String,
    pub status: JobStatus,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub progress: f64,
    pub stages_total: u32,
    pub stages_completed: u32,
    pub rows_processed: u64,
    pub bytes_processed: u64,
    pub error: Option<String>,
    pub worker_id: Option<WorkerId>,
    /// Result data, only present once completed
    #[serde(skip)]
    pub result: Option<Arc<QueryOutput>>,
}

impl Job {
    /// A freshly submitted job
    pub fn new(id: JobId, sql: impl Into<String>, now: u64) -> Self {
        Self {
            id,
            sql: sql.into(),
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            progress: 0.0,
            stages_total: 1,
            stages_completed: 0,
            rows_processed: 0,
            bytes_processed: 0,
            error: None,
            worker_id: None,
            result: None,
        }
    }

    pub fn running(&self, now: u64) -> Self {
        Self {
            status: JobStatus::Running,
            started_at: Some(now),
            ..self.clone()
        }
    }

    pub fn assigned(&self, worker_id: WorkerId) -> Self {
        Self {
            worker_id: Some(worker_id),
            ..self.clone()
        }
    }

    pub fn completed(&self, output: Arc<QueryOutput>, now: u64) -> Self {
        Self {
            status: JobStatus::Completed,
            completed_at: Some(now),
            progress: 1.0,
            stages_completed: 1,
            rows_processed: output.total_rows as u64,
            bytes_processed: output.total_bytes as u64,
            result: Some(output),
            ..self.clone()
        }
    }

    pub fn failed(&self, error: impl Into<String>, now: u64) -> Self {
        Self {
            status: JobStatus::Failed,
            completed_at: Some(now),
            error: Some(error.into()),
            ..self.clone()
        }
    }

    pub fn cancelled(&self, now: u64) -> Self {
        Self {
            status: JobStatus::Cancelled,
            completed_at: Some(now),
            error: Some(CANCELLED_BY_USER.to_string()),
            ..self.clone()
        }
    }
}

/// Error text of a job that could not be placed
pub const NO_WORKERS_AVAILABLE: &str = "No workers available";

/// Error text of a cancelled job
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Cluster summary, recomputed on every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Workers that are live and not offline
    pub online_workers: usize,
    pub total_workers: usize,
    /// Pending plus running jobs
    pub active_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    /// Bytes processed across all workers
    pub total_bytes_processed: u64,
    pub uptime_secs: u64,
    pub workers: Vec<WorkerInfo>,
}

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum heartbeat age for a worker to receive new jobs
    pub staleness_window_ms: u64,
    /// Deadline for one remote execute call
    pub execute_timeout_ms: u64,
    /// How often stale workers are swept to `offline`
    pub health_check_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            staleness_window_ms: 30_000,
            execute_timeout_ms: 300_000, // 5 minutes
            health_check_interval_ms: 5_000,
        }
    }
}

/// Get current time in milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    fn one_row_output() -> Arc<QueryOutput> {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1]))])
                .unwrap();
        Arc::new(QueryOutput::new(schema, vec![batch]))
    }

    #[test]
    fn test_job_id_shape() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), JobId::LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_transitions_build_new_records() {
        let job = Job::new(JobId::from("abc"), "SELECT 1", 100);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!((job.stages_total, job.stages_completed), (1, 0));

        let running = job.running(200);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.started_at, Some(200));

        let done = running
            .assigned(WorkerId::from("w1"))
            .completed(one_row_output(), 300);
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 1.0);
        assert_eq!(done.stages_completed, 1);
        assert_eq!(done.rows_processed, 1);
        assert!(done.bytes_processed > 0);
        assert_eq!(done.worker_id, Some(WorkerId::from("w1")));
        assert!(done.error.is_none());
    }

    #[test]
    fn test_cancelled_sets_error() {
        let job = Job::new(JobId::from("abc"), "SELECT 1", 100).cancelled(150);
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.completed_at, Some(150));
        assert_eq!(job.error.as_deref(), Some(CANCELLED_BY_USER));
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_job_json_omits_result() {
        let job = Job::new(JobId::from("abc"), "SELECT 1", 100)
            .running(110)
            .completed(one_row_output(), 120);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["id"], "abc");
        assert!(json.get("result").is_none());

        let back: Job = serde_json::from_value(json).unwrap();
        assert!(back.result.is_none());
        assert_eq!(back.rows_processed, 1);
    }

    #[test]
    fn test_worker_liveness() {
        let worker = WorkerInfo::new(WorkerId::from("w1"), "localhost", 9000, 1_000);
        assert!(worker.is_live(1_000, 30_000));
        assert!(worker.is_live(30_999, 30_000));
        assert!(!worker.is_live(31_000, 30_000));
        assert_eq!(worker.endpoint().url(), "http://localhost:9000");
    }

    #[test]
    fn test_status_for_load() {
        let mut worker = WorkerInfo::new(WorkerId::from("w1"), "localhost", 9000, 0);
        assert_eq!(worker.status_for_load(1), WorkerStatus::Busy);
        assert_eq!(worker.status_for_load(0), WorkerStatus::Idle);
        worker.status = WorkerStatus::Offline;
        assert_eq!(worker.status_for_load(0), WorkerStatus::Offline);
    }
}
