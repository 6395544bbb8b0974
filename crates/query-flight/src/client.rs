//! Arrow Flight client for the coordinator and workers
//!
//! One client type speaks to both sides of the cluster: workers use it to
//! register and heartbeat against the coordinator, the coordinator uses it to
//! run SQL on a worker, and the CLI uses it to submit and inspect jobs.

use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::Schema;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Action, Ticket};
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use tonic::transport::Channel;
use tracing::debug;

use crate::error::FlightError;
use crate::output::QueryOutput;
use crate::protocol::{
    actions, HeartbeatRequest, RegisterRequest, StatusReport, UnregisterRequest, PONG,
    UNKNOWN_WORKER,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Flight client for remote control actions and query execution
pub struct FlightClient {
    client: FlightServiceClient<Channel>,
    endpoint: String,
}

impl FlightClient {
    /// Connect to a Flight server given as a URL (`http://host:port`)
    pub async fn connect(endpoint: &str) -> Result<Self, FlightError> {
        debug!("Connecting to Flight server at {}", endpoint);

        let channel = Channel::from_shared(endpoint.to_string())
            .map_err(|e| FlightError::InvalidEndpoint(e.to_string()))?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await?;

        let client = FlightServiceClient::new(channel);

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute a SQL query and return the complete result
    ///
    /// The call only returns once the whole stream has been drained.
    pub async fn execute_sql(&mut self, sql: impl Into<String>) -> Result<QueryOutput, FlightError> {
        let sql_string = sql.into();
        debug!("Executing SQL on {}: {}", self.endpoint, sql_string);
        self.fetch(Ticket::new(sql_string)).await
    }

    /// Fetch the stream behind an arbitrary ticket
    pub async fn fetch(&mut self, ticket: Ticket) -> Result<QueryOutput, FlightError> {
        let response = self.client.do_get(ticket).await?;
        let stream = response
            .into_inner()
            .map_err(arrow_flight::error::FlightError::Tonic);

        let mut batch_stream = FlightRecordBatchStream::new_from_flight_data(stream);
        let mut batches = Vec::new();
        while let Some(batch) = batch_stream.try_next().await? {
            batches.push(batch);
        }

        let schema = batch_stream
            .schema()
            .cloned()
            .or_else(|| batches.first().map(|b| b.schema()))
            .unwrap_or_else(|| Arc::new(Schema::empty()));

        let output = QueryOutput::new(schema, batches);
        debug!(
            "Received {} rows in {} batches from {}",
            output.total_rows,
            output.batches.len(),
            self.endpoint
        );
        Ok(output)
    }

    /// Run an action and return the first result body as text
    pub async fn action(
        &mut self,
        action_type: &str,
        body: impl Into<String>,
    ) -> Result<String, FlightError> {
        let action = Action::new(action_type, body.into());

        let response = self.client.do_action(action).await?;
        let mut stream = response.into_inner();

        let mut reply = None;
        while let Some(result) = stream.message().await? {
            if reply.is_none() {
                reply = Some(result.body);
            }
        }

        let body = reply.unwrap_or_default();
        String::from_utf8(body.to_vec()).map_err(|e| FlightError::InvalidRequest(e.to_string()))
    }

    /// Run an action whose reply is a JSON document
    pub async fn action_json<T: DeserializeOwned>(
        &mut self,
        action_type: &str,
        body: impl Into<String>,
    ) -> Result<T, FlightError> {
        let text = self.action(action_type, body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Health probe
    pub async fn ping(&mut self) -> Result<(), FlightError> {
        let reply = self.action(actions::PING, "").await?;
        if reply == PONG {
            Ok(())
        } else {
            Err(FlightError::InvalidRequest(format!(
                "unexpected ping reply: {}",
                reply
            )))
        }
    }

    /// Register a worker with the coordinator
    pub async fn register(&mut self, request: &RegisterRequest) -> Result<(), FlightError> {
        self.action(actions::REGISTER, request.to_string()).await?;
        Ok(())
    }

    /// Send a heartbeat; returns `false` when the coordinator does not know the worker
    pub async fn heartbeat(&mut self, request: &HeartbeatRequest) -> Result<bool, FlightError> {
        let reply = self.action(actions::HEARTBEAT, request.to_string()).await?;
        Ok(reply != UNKNOWN_WORKER)
    }

    /// Remove a worker from the coordinator
    pub async fn unregister(&mut self, request: &UnregisterRequest) -> Result<(), FlightError> {
        self.action(actions::UNREGISTER, request.to_string()).await?;
        Ok(())
    }

    /// Ask a worker for its resource usage
    pub async fn status(&mut self) -> Result<StatusReport, FlightError> {
        let reply = self.action(actions::STATUS, "").await?;
        reply.parse()
    }

    /// Submit SQL to the coordinator, returning the job id
    pub async fn submit(&mut self, sql: impl Into<String>) -> Result<String, FlightError> {
        self.action(actions::SUBMIT, sql).await
    }
}
