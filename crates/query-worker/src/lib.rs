//! Worker process for the query cluster
//!
//! A worker runs SQL on a local DataFusion session and serves it over Arrow
//! Flight. Files referenced inline as `read_csv('path')`, `read_parquet(...)`
//! or `read_json(...)` are registered as tables on first use.
//!
//! # Example
//!
//! ```ignore
//! use query_worker::{Worker, WorkerConfig};
//! use std::sync::Arc;
//!
//! let worker = Arc::new(Worker::new(WorkerConfig::default())?);
//! worker.run(query_flight::server::shutdown_signal()).await?;
//! ```

pub mod address;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod server;
pub mod sources;
pub mod worker;

pub use engine::{DataFusionEngine, SqlEngine};
pub use error::{Result, WorkerError};
pub use metrics::MetricsCollector;
pub use server::WorkerService;
pub use worker::{generate_worker_id, TableSpec, Worker, WorkerConfig};
