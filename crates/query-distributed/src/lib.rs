//! Coordinator for the query cluster
//!
//! This crate tracks a pool of worker processes and runs submitted SQL jobs
//! on them, one job per worker call.
//!
//! # Architecture
//!
//! - **Registry**: workers register, heartbeat their CPU and memory usage,
//!   and unregister. Workers whose heartbeat is older than the staleness
//!   window stop receiving jobs and are swept to `offline`.
//! - **Scheduler**: greedy placement on the idle live worker with the lowest
//!   CPU usage, falling back to busy workers when none is idle.
//! - **Executor**: drives each job from `pending` to `completed`, `failed` or
//!   `cancelled` on a background task, under a deadline.
//! - **Service**: Arrow Flight front end used by workers and clients.
//!
//! # Example
//!
//! ```ignore
//! use query_distributed::{Coordinator, CoordinatorService, SchedulerConfig};
//! use std::sync::Arc;
//!
//! let coordinator = Arc::new(Coordinator::with_flight_transport(SchedulerConfig::default()));
//! let _monitor = coordinator.spawn_health_monitor();
//!
//! let listener = query_flight::server::bind("0.0.0.0", 8814).await?;
//! query_flight::server::serve(CoordinatorService::new(coordinator), listener, shutdown).await?;
//! ```
//!
//! # Modules
//!
//! - [`coordinator`]: the coordinator object
//! - [`registry`]: worker registry and worker leases
//! - [`scheduler`]: placement policy
//! - [`jobs`]: job table
//! - [`executor`]: job lifecycle driver
//! - [`flight_transport`]: Arrow Flight transport to workers
//! - [`service`]: Flight service exposing the coordinator

pub mod coordinator;
pub mod error;
pub mod executor;
pub mod flight_transport;
pub mod jobs;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod types;

// Re-exports
pub use coordinator::Coordinator;
pub use error::{DistributedError, Result};
pub use executor::JobExecutor;
pub use flight_transport::{FlightTransport, WorkerTransport};
pub use jobs::JobTable;
pub use registry::{WorkerLease, WorkerRegistry};
pub use scheduler::choose_worker;
pub use service::CoordinatorService;
pub use types::*;
