//! Error types for Arrow Flight operations

use thiserror::Error;

/// Errors that can occur during Flight operations
#[derive(Debug, Error)]
pub enum FlightError {
    /// A control-plane payload could not be decoded
    #[error("Malformed {kind} payload: {payload:?}")]
    MalformedPayload {
        /// Which payload was being decoded
        kind: &'static str,
        /// The offending text
        payload: String,
    },

    /// Endpoint string is not `HOST:PORT`
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Arrow Flight error
    #[error("Flight error: {0}")]
    FlightDecodeError(#[from] arrow_flight::error::FlightError),

    /// gRPC transport error
    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    /// gRPC status error
    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON body could not be decoded
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlightError {
    /// Message of the remote status when the error came back from a peer
    ///
    /// Errors raised on the far side of a call arrive as a `tonic::Status`,
    /// either directly or wrapped by the record batch decoder. This returns
    /// the peer's own message so callers can report it without the gRPC
    /// framing.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            FlightError::GrpcError(status) => Some(status.message()),
            FlightError::FlightDecodeError(arrow_flight::error::FlightError::Tonic(status)) => {
                Some(status.message())
            }
            _ => None,
        }
    }
}

impl From<FlightError> for tonic::Status {
    fn from(err: FlightError) -> Self {
        match err {
            e @ FlightError::MalformedPayload { .. } => tonic::Status::invalid_argument(e.to_string()),
            FlightError::InvalidEndpoint(msg) => tonic::Status::invalid_argument(msg),
            FlightError::ArrowError(e) => tonic::Status::internal(e.to_string()),
            FlightError::FlightDecodeError(e) => tonic::Status::internal(e.to_string()),
            FlightError::TransportError(e) => tonic::Status::unavailable(e.to_string()),
            FlightError::GrpcError(status) => status,
            FlightError::IoError(e) => tonic::Status::internal(e.to_string()),
            FlightError::JsonError(e) => tonic::Status::internal(e.to_string()),
            FlightError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
            FlightError::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_payload_maps_to_invalid_argument() {
        let err = FlightError::MalformedPayload {
            kind: "heartbeat",
            payload: "w1:abc".to_string(),
        };
        let status = tonic::Status::from(err);
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("heartbeat"));
    }

    #[test]
    fn test_remote_message() {
        let err = FlightError::GrpcError(tonic::Status::internal("table 'foo' not found"));
        assert_eq!(err.remote_message(), Some("table 'foo' not found"));

        let wrapped = FlightError::FlightDecodeError(arrow_flight::error::FlightError::Tonic(
            tonic::Status::internal("boom"),
        ));
        assert_eq!(wrapped.remote_message(), Some("boom"));

        assert!(FlightError::Internal("x".into()).remote_message().is_none());
    }
}
