//! Arrow Flight control plane for the query cluster
//!
//! This crate holds the wire contract shared by the coordinator and its
//! workers. Everything travels over Arrow Flight (gRPC):
//!
//! - **Control actions** (`DoAction`): worker registration, heartbeats,
//!   unregistration, health probes and job management. Bodies are small
//!   colon-delimited strings or JSON documents.
//! - **Query execution** (`DoGet`): the ticket carries raw SQL text and the
//!   response is a stream of Arrow record batches.
//!
//! # Example
//!
//! ```ignore
//! use query_flight::{FlightClient, HeartbeatRequest};
//!
//! let mut client = FlightClient::connect("http://localhost:8814").await?;
//! client.heartbeat(&HeartbeatRequest::new("worker-1", 12.5, 256.0, 41.0)).await?;
//!
//! let mut worker = FlightClient::connect("http://10.0.0.7:8815").await?;
//! let output = worker.execute_sql("SELECT 1").await?;
//! assert_eq!(output.total_rows, 1);
//! ```
//!
//! # Modules
//!
//! - [`protocol`]: action names and payload codecs
//! - [`client`]: Flight client used by workers, the coordinator and the CLI
//! - [`server`]: helpers for hosting a Flight service
//! - [`output`]: collected query results
//! - [`endpoint`]: `HOST:PORT` endpoint parsing

pub mod client;
pub mod endpoint;
pub mod error;
pub mod output;
pub mod protocol;
pub mod server;

pub use client::FlightClient;
pub use endpoint::FlightEndpoint;
pub use error::FlightError;
pub use output::QueryOutput;
pub use protocol::{HeartbeatRequest, RegisterRequest, StatusReport, UnregisterRequest};

/// Result type for Flight operations
pub type Result<T> = std::result::Result<T, FlightError>;
