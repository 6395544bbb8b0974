//! Control-plane payloads exchanged between coordinator and workers
//!
//! Worker lifecycle messages are plain colon-delimited strings carried as the
//! body of a Flight `DoAction`:
//!
//! | action       | body                                       |
//! |--------------|--------------------------------------------|
//! | `register`   | `<workerId>:<host>:<port>`                 |
//! | `heartbeat`  | `<workerId>:<cpu>:<memMb>:<memPercent>`    |
//! | `unregister` | `<workerId>`                               |
//! | `status`     | response body `<cpu>:<memMb>:<memPercent>` |
//!
//! Floats are written with Rust's shortest round-trip formatting, so decoding
//! an encoded payload gives back exactly the same values.

use std::fmt;
use std::str::FromStr;

use crate::error::FlightError;

/// Action names understood by the coordinator and the workers
pub mod actions {
    /// Worker announces itself (coordinator)
    pub const REGISTER: &str = "register";
    /// Periodic liveness and metrics report (coordinator)
    pub const HEARTBEAT: &str = "heartbeat";
    /// Worker leaves the cluster (coordinator)
    pub const UNREGISTER: &str = "unregister";
    /// Health probe (coordinator and worker)
    pub const PING: &str = "ping";
    /// Current resource usage (worker)
    pub const STATUS: &str = "status";
    /// Submit a SQL job, body is the SQL text (coordinator)
    pub const SUBMIT: &str = "submit";
    /// Fetch one job as JSON, body is the job id (coordinator)
    pub const JOB: &str = "job";
    /// Fetch every job as a JSON array (coordinator)
    pub const JOBS: &str = "jobs";
    /// Cancel a job, body is the job id (coordinator)
    pub const CANCEL: &str = "cancel";
    /// Cluster summary as JSON (coordinator)
    pub const CLUSTER_STATUS: &str = "cluster_status";
}

/// Generic acknowledgement body
pub const ACK: &str = "ack";
/// Heartbeat reply when the coordinator does not know the worker
pub const UNKNOWN_WORKER: &str = "unknown";
/// Reply to `ping`
pub const PONG: &str = "pong";
/// Reply to `cancel` when the job was cancelled
pub const CANCELLED: &str = "cancelled";
/// Reply to `cancel` when the job was unknown or already finished
pub const NOT_CANCELLABLE: &str = "not_cancellable";

/// Check that a worker id can travel inside a colon-delimited payload
pub fn validate_worker_id(worker_id: &str) -> Result<(), FlightError> {
    if worker_id.is_empty() || worker_id.contains(':') || worker_id.trim() != worker_id {
        return Err(FlightError::InvalidRequest(format!(
            "worker id must be non-empty and must not contain ':' or surrounding whitespace, got {:?}",
            worker_id
        )));
    }
    Ok(())
}

fn parse_metric(kind: &'static str, payload: &str, field: &str) -> Result<f64, FlightError> {
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| malformed(kind, payload))
}

fn malformed(kind: &'static str, payload: &str) -> FlightError {
    FlightError::MalformedPayload {
        kind,
        payload: payload.to_string(),
    }
}

/// `register` body: a worker announcing where it can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub worker_id: String,
    pub host: String,
    pub port: u16,
}

impl RegisterRequest {
    pub fn new(worker_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            worker_id: worker_id.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.worker_id, self.host, self.port)
    }
}

impl FromStr for RegisterRequest {
    type Err = FlightError;

    /// The id ends at the first `:` and the port starts after the last one,
    /// so IPv6 hosts such as `::1` survive.
    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "register";

        let (worker_id, rest) = payload
            .split_once(':')
            .ok_or_else(|| malformed(KIND, payload))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| malformed(KIND, payload))?;
        let port = port.parse::<u16>().map_err(|_| malformed(KIND, payload))?;

        if worker_id.is_empty() || host.is_empty() {
            return Err(malformed(KIND, payload));
        }

        Ok(Self::new(worker_id, host, port))
    }
}

/// `heartbeat` body: liveness plus the worker's latest metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
}

impl HeartbeatRequest {
    pub fn new(
        worker_id: impl Into<String>,
        cpu_percent: f64,
        memory_mb: f64,
        memory_percent: f64,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            cpu_percent,
            memory_mb,
            memory_percent,
        }
    }

    /// Build a heartbeat from a status sample
    pub fn from_report(worker_id: impl Into<String>, report: &StatusReport) -> Self {
        Self::new(
            worker_id,
            report.cpu_percent,
            report.memory_mb,
            report.memory_percent,
        )
    }
}

impl fmt::Display for HeartbeatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.worker_id, self.cpu_percent, self.memory_mb, self.memory_percent
        )
    }
}

impl FromStr for HeartbeatRequest {
    type Err = FlightError;

    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "heartbeat";

        // Metrics are taken from the right, whatever remains is the id
        let mut parts = payload.rsplitn(4, ':');
        let memory_percent = parts.next().ok_or_else(|| malformed(KIND, payload))?;
        let memory_mb = parts.next().ok_or_else(|| malformed(KIND, payload))?;
        let cpu_percent = parts.next().ok_or_else(|| malformed(KIND, payload))?;
        let worker_id = parts.next().ok_or_else(|| malformed(KIND, payload))?;

        if worker_id.is_empty() {
            return Err(malformed(KIND, payload));
        }

        Ok(Self {
            worker_id: worker_id.to_string(),
            cpu_percent: parse_metric(KIND, payload, cpu_percent)?,
            memory_mb: parse_metric(KIND, payload, memory_mb)?,
            memory_percent: parse_metric(KIND, payload, memory_percent)?,
        })
    }
}

/// `unregister` body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnregisterRequest {
    pub worker_id: String,
}

impl UnregisterRequest {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
        }
    }
}

impl fmt::Display for UnregisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.worker_id)
    }
}

impl FromStr for UnregisterRequest {
    type Err = FlightError;

    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        let worker_id = payload.trim();
        if worker_id.is_empty() {
            return Err(malformed("unregister", payload));
        }
        Ok(Self::new(worker_id))
    }
}

/// Reply to the worker `status` action
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusReport {
    /// System-wide CPU utilisation, percent
    pub cpu_percent: f64,
    /// Resident memory of the worker process, MiB
    pub memory_mb: f64,
    /// System memory in use, percent
    pub memory_percent: f64,
}

impl StatusReport {
    pub fn new(cpu_percent: f64, memory_mb: f64, memory_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_mb,
            memory_percent,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.cpu_percent, self.memory_mb, self.memory_percent
        )
    }
}

impl FromStr for StatusReport {
    type Err = FlightError;

    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "status";

        let fields: Vec<&str> = payload.split(':').collect();
        let [cpu, mem_mb, mem_percent] = fields.as_slice() else {
            return Err(malformed(KIND, payload));
        };

        Ok(Self {
            cpu_percent: parse_metric(KIND, payload, cpu)?,
            memory_mb: parse_metric(KIND, payload, mem_mb)?,
            memory_percent: parse_metric(KIND, payload, mem_percent)?,
        })
    }
}
