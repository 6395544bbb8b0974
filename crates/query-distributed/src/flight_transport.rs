//! Flight Transport for Distributed Execution
//!
//! Uses Arrow Flight as the transport layer between the coordinator and its
//! workers: the SQL text becomes the `DoGet` ticket and the worker streams
//! the result back.

use async_trait::async_trait;
use query_flight::{FlightClient, QueryOutput};
use tracing::debug;

use crate::error::{DistributedError, Result};
use crate::types::WorkerInfo;

/// Trait for the coordinator to worker execution channel
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Run `sql` on `worker` and collect the whole result
    async fn execute(&self, worker: &WorkerInfo, sql: &str) -> Result<QueryOutput>;
}

/// Transport that dials the worker's Flight endpoint for every job
#[derive(Debug, Default, Clone)]
pub struct FlightTransport;

impl FlightTransport {
    /// Create a new Flight transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerTransport for FlightTransport {
    async fn execute(&self, worker: &WorkerInfo, sql: &str) -> Result<QueryOutput> {
        let url = worker.endpoint().url();
        debug!("Sending query to worker {} at {}", worker.id, url);

        let mut client = FlightClient::connect(&url)
            .await
            .map_err(|e| DistributedError::NetworkError(format!("{}: {}", url, e)))?;

        client
            .execute_sql(sql)
            .await
            .map_err(DistributedError::from_worker_call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_millis, WorkerId};

    #[tokio::test]
    async fn test_unreachable_worker_is_network_error() {
        // Port 1 on loopback is not expected to run a Flight server
        let worker = WorkerInfo::new(WorkerId::from("w1"), "127.0.0.1", 1, now_millis());
        let err = FlightTransport::new()
            .execute(&worker, "SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, DistributedError::NetworkError(_)));
    }
}
