//! Worker process lifecycle
//!
//! A worker binds its Flight endpoint, registers with the coordinator,
//! heartbeats its resource usage on a fixed period and unregisters when it
//! shuts down. Coordinator outages never stop the worker: failed calls are
//! logged and retried on the next tick.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use query_flight::protocol::validate_worker_id;
use query_flight::server::{bind, serve};
use query_flight::{
    FlightClient, FlightEndpoint, HeartbeatRequest, RegisterRequest, UnregisterRequest,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::address::advertise_host;
use crate::engine::{DataFusionEngine, SqlEngine};
use crate::error::{Result, WorkerError};
use crate::metrics::MetricsCollector;
use crate::server::WorkerService;

/// A file preloaded as a named table at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub path: String,
}

impl FromStr for TableSpec {
    type Err = WorkerError;

    /// Parses `name=path`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
                Ok(Self {
                    name: name.trim().to_string(),
                    path: path.trim().to_string(),
                })
            }
            _ => Err(WorkerError::Config(format!(
                "table must be given as name=path, got {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for TableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.path)
    }
}

/// Configuration for a worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Id reported to the coordinator; generated when absent
    pub worker_id: Option<String>,
    /// Interface the Flight endpoint binds to
    pub bind_host: String,
    pub port: u16,
    /// Host the coordinator should dial; derived from `bind_host` when absent
    pub advertise_host: Option<String>,
    /// Coordinator endpoint, `HOST:PORT`
    pub scheduler: String,
    pub heartbeat_interval_ms: u64,
    /// Tables registered before the endpoint starts
    pub tables: Vec<TableSpec>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            bind_host: "0.0.0.0".to_string(),
            port: 8815,
            advertise_host: None,
            scheduler: "localhost:8814".to_string(),
            heartbeat_interval_ms: 5_000,
            tables: Vec::new(),
        }
    }
}

/// Generate a worker id of the form `worker-1a2b3c4d`
pub fn generate_worker_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("worker-{}", &hex[..8])
}

/// A worker node
pub struct Worker {
    id: String,
    config: WorkerConfig,
    scheduler: FlightEndpoint,
    engine: Arc<dyn SqlEngine>,
    metrics: Arc<MetricsCollector>,
}

impl Worker {
    /// Create a worker backed by a fresh DataFusion session
    pub fn new(config: WorkerConfig) -> Result<Self> {
        Self::with_engine(config, Arc::new(DataFusionEngine::new()))
    }

    /// Create a worker on top of any SQL engine
    pub fn with_engine(config: WorkerConfig, engine: Arc<dyn SqlEngine>) -> Result<Self> {
        let id = config
            .worker_id
            .clone()
            .unwrap_or_else(generate_worker_id);
        validate_worker_id(&id)?;

        let scheduler = FlightEndpoint::parse(&config.scheduler)?;
        if config.heartbeat_interval_ms == 0 {
            return Err(WorkerError::Config(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }

        Ok(Self {
            id,
            config,
            scheduler,
            engine,
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Coordinator endpoint this worker reports to
    pub fn scheduler(&self) -> &FlightEndpoint {
        &self.scheduler
    }

    async fn coordinator(&self) -> Result<FlightClient> {
        Ok(FlightClient::connect(&self.scheduler.url()).await?)
    }

    /// Register configured tables with the engine
    pub async fn preload_tables(&self) -> Result<()> {
        for table in &self.config.tables {
            self.engine.register_table(&table.name, &table.path).await?;
        }
        Ok(())
    }

    /// Announce this worker to the coordinator
    pub async fn register(&self, request: &RegisterRequest) -> Result<()> {
        self.coordinator().await?.register(request).await?;
        info!(
            "Registered with coordinator {} as {} ({}:{})",
            self.scheduler, self.id, request.host, request.port
        );
        Ok(())
    }

    /// Send one heartbeat; returns `false` if the coordinator does not know us
    pub async fn send_heartbeat(&self) -> Result<bool> {
        let report = self.metrics.sample();
        let request = HeartbeatRequest::from_report(self.id.clone(), &report);
        let known = self.coordinator().await?.heartbeat(&request).await?;
        debug!("Heartbeat sent: {}", request);
        Ok(known)
    }

    /// Leave the cluster
    pub async fn unregister(&self) -> Result<()> {
        self.coordinator()
            .await?
            .unregister(&UnregisterRequest::new(self.id.clone()))
            .await?;
        info!("Unregistered {} from coordinator {}", self.id, self.scheduler);
        Ok(())
    }

    /// One heartbeat bounded by `deadline`
    ///
    /// When the coordinator answers that it does not know this worker (for
    /// instance after a restart), the worker registers again with
    /// `registration` within the same deadline.
    pub async fn heartbeat_round(
        &self,
        registration: &RegisterRequest,
        deadline: Duration,
    ) -> Result<()> {
        let round = async {
            if !self.send_heartbeat().await? {
                warn!("Coordinator does not know worker {}, registering again", self.id);
                self.register(registration).await?;
            }
            Ok::<(), WorkerError>(())
        };
        tokio::time::timeout(deadline, round)
            .await
            .map_err(|_| WorkerError::Timeout(deadline))?
    }

    /// Heartbeat forever on the configured period
    ///
    /// Errors are logged and swallowed. Each round must finish within one
    /// period so an unresponsive coordinator cannot stall the loop.
    pub fn spawn_heartbeat_loop(self: &Arc<Self>, registration: RegisterRequest) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        let period = Duration::from_millis(self.config.heartbeat_interval_ms);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; registration just happened
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = worker.heartbeat_round(&registration, period).await {
                    warn!("Heartbeat failed: {}", e);
                }
            }
        })
    }

    /// Serve queries until `shutdown` resolves
    ///
    /// Registration failures do not abort startup; the heartbeat loop keeps
    /// trying and re-registers once the coordinator is reachable.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.preload_tables().await?;

        let listener = bind(&self.config.bind_host, self.config.port).await?;
        let port = listener.local_addr()?.port();
        let host = advertise_host(&self.config.bind_host, self.config.advertise_host.as_deref()).await;
        let registration = RegisterRequest::new(self.id.clone(), host, port);

        info!(
            "Worker {} listening on {}:{}, coordinator {}",
            self.id, self.config.bind_host, port, self.scheduler
        );

        if let Err(e) = self.register(&registration).await {
            warn!("Initial registration failed: {}", e);
        }
        let heartbeat = self.spawn_heartbeat_loop(registration);

        let service = WorkerService::with_metrics(Arc::clone(&self.engine), Arc::clone(&self.metrics));
        let served = serve(service, listener, shutdown).await;

        heartbeat.abort();
        if let Err(e) = self.unregister().await {
            warn!("Unregister failed: {}", e);
        }

        served.map_err(WorkerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.port, 8815);
        assert_eq!(config.scheduler, "localhost:8814");
        assert_eq!(config.heartbeat_interval_ms, 5_000);
        assert_eq!(config.bind_host, "0.0.0.0");
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"port": 9001, "tables": [{"name": "t", "path": "/d/t.csv"}]}"#)
                .unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.scheduler, "localhost:8814");
        assert_eq!(config.tables[0].name, "t");
    }

    #[test]
    fn test_table_spec() {
        let spec: TableSpec = "sales=/data/sales.csv".parse().unwrap();
        assert_eq!(spec.name, "sales");
        assert_eq!(spec.path, "/data/sales.csv");
        assert_eq!(spec.to_string(), "sales=/data/sales.csv");

        assert!("sales".parse::<TableSpec>().is_err());
        assert!("=x.csv".parse::<TableSpec>().is_err());
    }

    #[test]
    fn test_worker_ids() {
        let id = generate_worker_id();
        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 8);

        let config = WorkerConfig {
            worker_id: Some("bad:id".to_string()),
            ..WorkerConfig::default()
        };
        assert!(Worker::new(config).is_err());

        let worker = Worker::new(WorkerConfig {
            worker_id: Some("w1".to_string()),
            ..WorkerConfig::default()
        })
        .unwrap();
        assert_eq!(worker.id(), "w1");
        assert_eq!(worker.scheduler().url(), "http://localhost:8814");
    }

    #[tokio::test]
    async fn test_heartbeat_without_coordinator_is_error() {
        let worker = Worker::new(WorkerConfig {
            worker_id: Some("w1".to_string()),
            scheduler: "127.0.0.1:1".to_string(),
            ..WorkerConfig::default()
        })
        .unwrap();
        assert!(worker.send_heartbeat().await.is_err());
        assert!(worker.unregister().await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_round_gives_up_on_silent_coordinator() {
        // Accepted by the kernel backlog, never answered
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let worker = Worker::new(WorkerConfig {
            worker_id: Some("w1".to_string()),
            scheduler: format!("127.0.0.1:{}", port),
            ..WorkerConfig::default()
        })
        .unwrap();
        let registration = RegisterRequest::new("w1", "127.0.0.1", 9000);

        let deadline = Duration::from_millis(200);
        let round = tokio::time::timeout(
            Duration::from_secs(10),
            worker.heartbeat_round(&registration, deadline),
        )
        .await
        .expect("heartbeat round outlived its deadline");
        assert!(matches!(round, Err(WorkerError::Timeout(d)) if d == deadline));
    }
}
