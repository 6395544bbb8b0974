//! Hosting helpers shared by the coordinator and worker Flight services

use std::future::Future;
use std::net::SocketAddr;

use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{Action, ActionType};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::net::TcpListener;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic::Status;
use tracing::{info, warn};

use crate::error::FlightError;

/// Stream type every `DoAction` handler in the cluster returns
pub type ActionStream = BoxStream<'static, Result<arrow_flight::Result, Status>>;

/// Stream type for `ListActions`
pub type ActionTypeStream = BoxStream<'static, Result<ActionType, Status>>;

/// A `DoAction` response made of a single result body
pub fn action_reply(body: impl Into<Vec<u8>>) -> ActionStream {
    let body: Vec<u8> = body.into();
    let result = arrow_flight::Result { body: body.into() };
    stream::once(async move { Ok(result) }).boxed()
}

/// Build the `ListActions` response from `(name, description)` pairs
pub fn action_types(actions: &[(&str, &str)]) -> ActionTypeStream {
    let items: Vec<Result<ActionType, Status>> = actions
        .iter()
        .map(|(name, description)| {
            Ok(ActionType {
                r#type: name.to_string(),
                description: description.to_string(),
            })
        })
        .collect();
    stream::iter(items).boxed()
}

/// Decode an action body as UTF-8 text
pub fn action_body(action: &Action) -> Result<&str, Status> {
    std::str::from_utf8(&action.body)
        .map_err(|_| Status::invalid_argument(format!("{} body is not UTF-8", action.r#type)))
}

/// Bind a TCP listener, accepting `[v6]` style hosts
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, FlightError> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Ok(TcpListener::bind((host, port)).await?)
}

/// Serve a Flight service on an already bound listener until `shutdown` resolves
pub async fn serve<S, F>(service: S, listener: TcpListener, shutdown: F) -> Result<(), FlightError>
where
    S: FlightService,
    F: Future<Output = ()> + Send,
{
    let addr: SocketAddr = listener.local_addr()?;
    info!("Starting Flight server on {}", addr);

    let incoming = TcpIncoming::from_listener(listener, true, None)
        .map_err(|e| FlightError::Internal(e.to_string()))?;

    Server::builder()
        .add_service(FlightServiceServer::new(service))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    info!("Flight server on {} stopped", addr);
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_action_reply() {
        let results: Vec<arrow_flight::Result> = action_reply("pong").try_collect().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(&results[0].body[..], b"pong");
    }

    #[tokio::test]
    async fn test_action_types() {
        let types: Vec<ActionType> = action_types(&[("ping", "Health probe"), ("status", "Usage")])
            .try_collect()
            .await
            .unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types[1].r#type, "status");
    }

    #[test]
    fn test_action_body() {
        let action = Action::new("submit", "SELECT 1".to_string());
        assert_eq!(action_body(&action).unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
