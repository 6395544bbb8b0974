//! Error types for the coordinator

use query_flight::FlightError;
use thiserror::Error;

use crate::types::NO_WORKERS_AVAILABLE;

/// Errors that can occur while scheduling and running jobs
#[derive(Error, Debug)]
pub enum DistributedError {
    /// No live worker can take the job
    #[error("{}", NO_WORKERS_AVAILABLE)]
    NoWorkersAvailable,

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Result requested for a job that has not completed
    #[error("Job {id} has no result (status: {status})")]
    JobNotCompleted { id: String, status: String },

    /// Submission without SQL text
    #[error("Missing SQL: a job needs a non-empty query")]
    EmptyQuery,

    /// The worker ran the query and reported an error
    #[error("{0}")]
    RemoteExecution(String),

    /// The worker could not be reached or the stream broke
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Remote execution exceeded its deadline
    #[error("Execution timed out after {0}ms")]
    TaskTimeout(u64),

    /// Flight protocol error
    #[error(transparent)]
    Flight(#[from] FlightError),
}

impl DistributedError {
    /// Classify an error returned by a worker call
    pub fn from_worker_call(err: FlightError) -> Self {
        match err.remote_message() {
            Some(message) => DistributedError::RemoteExecution(message.to_string()),
            None => DistributedError::NetworkError(err.to_string()),
        }
    }
}

impl From<DistributedError> for tonic::Status {
    fn from(err: DistributedError) -> Self {
        match err {
            DistributedError::JobNotFound(msg) => tonic::Status::not_found(msg),
            DistributedError::EmptyQuery => tonic::Status::invalid_argument(err.to_string()),
            DistributedError::JobNotCompleted { .. } => {
                tonic::Status::failed_precondition(err.to_string())
            }
            DistributedError::NoWorkersAvailable => tonic::Status::unavailable(err.to_string()),
            DistributedError::TaskTimeout(_) => tonic::Status::deadline_exceeded(err.to_string()),
            DistributedError::Flight(e) => e.into(),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, DistributedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_workers_message() {
        assert_eq!(
            DistributedError::NoWorkersAvailable.to_string(),
            "No workers available"
        );
    }

    #[test]
    fn test_worker_call_classification() {
        let remote = DistributedError::from_worker_call(FlightError::GrpcError(
            tonic::Status::internal("Error during planning: table 'x' not found"),
        ));
        assert_eq!(
            remote.to_string(),
            "Error during planning: table 'x' not found"
        );

        let network = DistributedError::from_worker_call(FlightError::Internal("reset".into()));
        assert!(matches!(network, DistributedError::NetworkError(_)));
    }

    #[test]
    fn test_status_codes() {
        let code = |err: DistributedError| tonic::Status::from(err).code();
        assert_eq!(code(DistributedError::JobNotFound("abc".into())), tonic::Code::NotFound);
        assert_eq!(code(DistributedError::EmptyQuery), tonic::Code::InvalidArgument);
        assert_eq!(code(DistributedError::NoWorkersAvailable), tonic::Code::Unavailable);
        assert_eq!(code(DistributedError::TaskTimeout(5)), tonic::Code::DeadlineExceeded);
        assert_eq!(
            code(DistributedError::RemoteExecution("boom".into())),
            tonic::Code::Internal
        );
    }
}
