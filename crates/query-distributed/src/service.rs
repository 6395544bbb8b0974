//! Flight service exposing the coordinator
//!
//! Control traffic arrives as `DoAction` calls: worker lifecycle messages use
//! the colon-delimited payloads from [`query_flight::protocol`], job
//! management replies with JSON. `DoGet` with a job id as ticket streams the
//! result of a completed job.

use std::sync::Arc;

use arrow_flight::flight_service_server::FlightService;
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use futures::stream::BoxStream;
use query_flight::protocol::{actions, ACK, CANCELLED, NOT_CANCELLABLE, PONG, UNKNOWN_WORKER};
use query_flight::server::{action_body, action_reply, action_types};
use query_flight::{HeartbeatRequest, RegisterRequest, UnregisterRequest};
use serde::Serialize;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::error::DistributedError;
use crate::types::{JobId, WorkerId};

const ACTIONS: &[(&str, &str)] = &[
    (actions::REGISTER, "Register a worker: <workerId>:<host>:<port>"),
    (actions::HEARTBEAT, "Worker heartbeat: <workerId>:<cpu>:<memMb>:<memPercent>"),
    (actions::UNREGISTER, "Remove a worker: <workerId>"),
    (actions::PING, "Health probe"),
    (actions::SUBMIT, "Submit SQL, returns the job id"),
    (actions::JOB, "Job record as JSON"),
    (actions::JOBS, "All jobs as JSON"),
    (actions::CANCEL, "Cancel a pending or running job"),
    (actions::CLUSTER_STATUS, "Cluster summary as JSON"),
];

/// Arrow Flight front end of a [`Coordinator`]
#[derive(Clone)]
pub struct CoordinatorService {
    coordinator: Arc<Coordinator>,
}

impl CoordinatorService {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Execute one control action and produce its reply body
    fn handle_action(&self, action: &Action) -> Result<String, Status> {
        let body = action_body(action)?;
        debug!("Action {} ({} bytes)", action.r#type, body.len());

        match action.r#type.as_str() {
            actions::REGISTER => {
                let request: RegisterRequest = body.parse()?;
                self.coordinator.register_worker(
                    WorkerId::new(request.worker_id),
                    &request.host,
                    request.port,
                );
                Ok(ACK.to_string())
            }
            actions::HEARTBEAT => {
                let request: HeartbeatRequest = body.parse()?;
                let known = self.coordinator.worker_heartbeat(
                    &WorkerId::new(request.worker_id),
                    request.cpu_percent,
                    request.memory_mb,
                    request.memory_percent,
                );
                let reply = if known { ACK } else { UNKNOWN_WORKER };
                Ok(reply.to_string())
            }
            actions::UNREGISTER => {
                let request: UnregisterRequest = body.parse()?;
                self.coordinator
                    .unregister_worker(&WorkerId::new(request.worker_id));
                Ok(ACK.to_string())
            }
            actions::PING => Ok(PONG.to_string()),
            actions::SUBMIT => {
                let id = self.coordinator.submit_job(body)?;
                Ok(id.to_string())
            }
            actions::JOB => {
                let id = JobId::from(body.trim());
                let job = self
                    .coordinator
                    .get_job(&id)
                    .ok_or_else(|| DistributedError::JobNotFound(id.to_string()))?;
                to_json(&job)
            }
            actions::JOBS => to_json(&self.coordinator.list_jobs()),
            actions::CANCEL => {
                let id = JobId::from(body.trim());
                let reply = if self.coordinator.cancel_job(&id) {
                    CANCELLED
                } else {
                    NOT_CANCELLABLE
                };
                Ok(reply.to_string())
            }
            actions::CLUSTER_STATUS => to_json(&self.coordinator.cluster_status()),
            other => Err(Status::unimplemented(format!("Unknown action: {}", other))),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, Status> {
    serde_json::to_string(value).map_err(|e| Status::internal(e.to_string()))
}

#[tonic::async_trait]
impl FlightService for CoordinatorService {
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

    /// Stream the result of a completed job; the ticket is the job id
    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        let ticket = request.into_inner();
        let id = JobId::from(String::from_utf8_lossy(&ticket.ticket).trim());

        let output = self.coordinator.job_result(&id)?;
        info!(
            "Streaming result of job {} ({} rows)",
            id, output.total_rows
        );
        Ok(Response::new(output.as_ref().clone().into_flight_stream()))
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
        let reply = self.handle_action(&action)?;
        Ok(Response::new(action_reply(reply)))
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        Ok(Response::new(action_types(ACTIONS)))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange is not supported"))
    }
}
