//! Flight service of a worker
//!
//! `DoGet` takes raw SQL as its ticket and streams the result: a schema
//! message followed by the record batches. `DoAction` answers `ping` and
//! `status`.

use std::sync::Arc;

use arrow_flight::flight_service_server::FlightService;
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use futures::stream::BoxStream;
use query_flight::protocol::{actions, PONG};
use query_flight::server::{action_reply, action_types};
use tonic::{Request, Response, Status, Streaming};
use tracing::info;

use crate::engine::SqlEngine;
use crate::metrics::MetricsCollector;

/// Worker-side Flight service
#[derive(Clone)]
pub struct WorkerService {
    engine: Arc<dyn SqlEngine>,
    metrics: Arc<MetricsCollector>,
}

impl WorkerService {
    /// Create a service with its own metrics collector
    pub fn new(engine: Arc<dyn SqlEngine>) -> Self {
        Self::with_metrics(engine, Arc::new(MetricsCollector::new()))
    }

    /// Create a service sharing a metrics collector with the heartbeat loop
    pub fn with_metrics(engine: Arc<dyn SqlEngine>, metrics: Arc<MetricsCollector>) -> Self {
        Self { engine, metrics }
    }
}

#[tonic::async_trait]
impl FlightService for WorkerService {
    type HandshakeStream = BoxStream<'static, Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, Result<FlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, Result<PutResult, Status>>;
    type DoActionStream = BoxStream<'static, Result<arrow_flight::Result, Status>>;
    type ListActionsStream = BoxStream<'static, Result<ActionType, Status>>;
    type DoExchangeStream = BoxStream<'static, Result<FlightData, Status>>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake is not supported"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        Err(Status::unimplemented("list_flights is not supported"))
    }

    async fn get_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        Err(Status::unimplemented("get_flight_info is not supported"))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info is not supported"))
    }

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("get_schema is not supported"))
    }

    /// Execute SQL and stream results
    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        let ticket = request.into_inner();
        let sql = std::str::from_utf8(&ticket.ticket)
            .map_err(|_| Status::invalid_argument("ticket is not UTF-8 SQL text"))?;
        if sql.trim().is_empty() {
            return Err(Status::invalid_argument("empty query"));
        }

        info!("Executing Flight query: {}", sql);
        let output = self.engine.execute(sql).await.map_err(Status::from)?;

        Ok(Response::new(output.into_flight_stream()))
    }

    async fn do_put(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        Err(Status::unimplemented("do_put is not supported"))
    }

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        let action = request.into_inner();

        match action.r#type.as_str() {
            actions::PING => Ok(Response::new(action_reply(PONG))),
            actions::STATUS => {
                let report = self.metrics.sample();
                Ok(Response::new(action_reply(report.to_string())))
            }
            other => Err(Status::unimplemented(format!("Unknown action: {}", other))),
        }
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        Ok(Response::new(action_types(&[
            (actions::PING, "Health probe"),
            (actions::STATUS, "Resource usage: <cpu>:<memMb>:<memPercent>"),
        ])))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange is not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DataFusionEngine;
    use query_flight::server::{bind, serve};
    use query_flight::{FlightClient, FlightError};

    async fn start() -> (FlightClient, tokio::sync::oneshot::Sender<()>) {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let service = WorkerService::new(Arc::new(DataFusionEngine::new()));
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(serve(service, listener, async move {
            let _ = stopped.await;
        }));

        let client = FlightClient::connect(&format!("http://127.0.0.1:{}", port))
            .await
            .unwrap();
        (client, stop)
    }

    #[tokio::test]
    async fn test_execute_over_flight() {
        let (mut client, stop) = start().await;

        let output = client
            .execute_sql("SELECT * FROM (VALUES (1, 'a'), (2, 'b')) AS t(id, name)")
            .await
            .unwrap();
        assert_eq!(output.total_rows, 2);
        assert_eq!(output.schema.field(1).name(), "name");

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_empty_result_keeps_schema() {
        let (mut client, stop) = start().await;

        let output = client.execute_sql("SELECT 1 AS x WHERE false").await.unwrap();
        assert_eq!(output.total_rows, 0);
        assert_eq!(output.num_columns(), 1);
        assert_eq!(output.schema.field(0).name(), "x");

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_engine_error_reaches_client() {
        let (mut client, stop) = start().await;

        let err = client.execute_sql("SELECT * FROM missing_table").await.unwrap_err();
        let message = err.remote_message().unwrap_or_default().to_string();
        assert!(message.contains("missing_table"), "got {:?}", err);
        assert!(matches!(err, FlightError::GrpcError(_) | FlightError::FlightDecodeError(_)));

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let (mut client, stop) = start().await;

        client.ping().await.unwrap();
        let report = client.status().await.unwrap();
        assert!((0.0..=100.0).contains(&report.memory_percent));

        let err = client.action("explode", "").await.unwrap_err();
        assert!(matches!(err, FlightError::GrpcError(s) if s.code() == tonic::Code::Unimplemented));

        let _ = stop.send(());
    }
}
