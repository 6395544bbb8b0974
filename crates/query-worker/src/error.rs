//! Error types for the worker

use std::time::Duration;

use datafusion::error::DataFusionError;
use query_flight::FlightError;
use thiserror::Error;

/// Errors raised while executing queries or talking to the coordinator
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The SQL engine rejected or failed the query
    #[error(transparent)]
    Engine(#[from] DataFusionError),

    /// A table could not be registered
    #[error("Cannot register table '{name}' from {path}: {reason}")]
    Registration {
        name: String,
        path: String,
        reason: String,
    },

    /// File format could not be derived from the path
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Invalid worker configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Control-plane call failed
    #[error(transparent)]
    Flight(#[from] FlightError),

    /// Coordinator did not answer in time
    #[error("Coordinator did not answer within {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WorkerError> for tonic::Status {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Flight(e) => e.into(),
            WorkerError::Config(msg) => tonic::Status::invalid_argument(msg),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

/// Result type for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_reaches_status_verbatim() {
        let err = WorkerError::from(DataFusionError::Plan("table 'x' not found".to_string()));
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(status.message(), "Error during planning: table 'x' not found");
    }
}
