//! WebSocket transport
//!
//! `/chathub` upgrades to a WebSocket carrying JSON frames in both
//! directions. Inbound frames are tagged by `type`; outbound frames are
//! serialized [`HubMessage`]s. `/health` and `/metrics` serve JSON for
//! orchestration and scraping.

use crate::error::{HubError, HubResult};
use crate::hub::ChatHub;
use crate::observability::metrics;
use crate::streaming::{ConnectionId, HubMessage};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket, Ws};
use warp::Filter;

/// Frame sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    ProcessMessage {
        message: String,
        session_id: String,
        #[serde(default)]
        mode: Option<String>,
    },
    JoinSession {
        session_id: String,
    },
    LeaveSession {
        session_id: String,
    },
    /// Echoed back to the sender only as a `toolCall` event
    SendToolCall {
        tool: String,
        #[serde(default)]
        input: serde_json::Value,
        #[serde(default)]
        output: serde_json::Value,
    },
}

/// Body of `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub connections: usize,
    pub sessions: usize,
    pub active_handoffs: usize,
}

fn health_status(hub: &ChatHub) -> HealthStatus {
    HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: hub.groups().connection_count(),
        sessions: hub.registry().session_count(),
        active_handoffs: hub.orchestrator().active_runtimes(),
    }
}

fn with_hub(
    hub: Arc<ChatHub>,
) -> impl Filter<Extract = (Arc<ChatHub>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&hub))
}

/// All HTTP and WebSocket routes of the hub
pub fn routes(
    hub: Arc<ChatHub>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let chathub = warp::path("chathub")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_hub(Arc::clone(&hub)))
        .map(|ws: Ws, hub: Arc<ChatHub>| ws.on_upgrade(move |socket| handle_socket(socket, hub)));

    let health = warp::path("health")
        .and(warp::get())
        .and(with_hub(hub))
        .map(|hub: Arc<ChatHub>| warp::reply::json(&health_status(&hub)));

    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    chathub
        .or(health)
        .or(metrics_route)
        .with(warp::cors().allow_any_origin())
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(hub: Arc<ChatHub>, addr: SocketAddr, shutdown: F) -> HubResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (bound, server) = warp::serve(routes(hub))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| HubError::internal(format!("failed to bind {addr}: {e}")))?;
    info!(%bound, "Chat hub listening");
    server.await;
    info!("Chat hub stopped");
    Ok(())
}

async fn handle_socket(socket: WebSocket, hub: Arc<ChatHub>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (connection, outbound) = hub.connect();

    let forward = tokio::spawn(async move {
        forward_messages(outbound, &mut ws_tx).await;
        let _ = ws_tx.close().await;
    });

    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                debug!(%connection, error = %e, "WebSocket receive failed");
                break;
            }
        };

        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };

        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => handle_frame(&hub, connection, frame),
            Err(e) => {
                hub.report_to(connection, &HubError::usage(format!("invalid frame: {e}")));
            }
        }
    }

    hub.disconnect(connection);
    let _ = forward.await;
}

async fn forward_messages<S>(mut outbound: UnboundedReceiver<HubMessage>, ws_tx: &mut S)
where
    S: futures::Sink<Message> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize hub message");
                continue;
            }
        };
        if ws_tx.send(Message::text(text)).await.is_err() {
            break;
        }
    }
}

fn handle_frame(hub: &Arc<ChatHub>, connection: ConnectionId, frame: ClientFrame) {
    match frame {
        ClientFrame::ProcessMessage {
            message,
            session_id,
            mode,
        } => {
            let hub = Arc::clone(hub);
            tokio::spawn(async move {
                if let Err(e) = hub
                    .process_message(&message, &session_id, mode.as_deref())
                    .await
                {
                    debug!(%connection, %session_id, error = %e, "Message rejected");
                    hub.report_to(connection, &e);
                }
            });
        }
        ClientFrame::JoinSession { session_id } => {
            if let Err(e) = hub.join_session(connection, &session_id) {
                hub.report_to(connection, &e);
            }
        }
        ClientFrame::LeaveSession { session_id } => {
            if let Err(e) = hub.leave_session(connection, &session_id) {
                hub.report_to(connection, &e);
            }
        }
        ClientFrame::SendToolCall {
            tool,
            input,
            output,
        } => {
            if !hub.send_tool_call(connection, &tool, input, output) {
                debug!(%connection, %tool, "Tool call for a closed connection dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::testing::mocks::MockAgentFactory;
    use serde_json::json;

    #[test]
    fn test_client_frames_decode() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "process_message",
            "message": "hi",
            "session_id": "s1"
        }))
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::ProcessMessage {
                message: "hi".to_string(),
                session_id: "s1".to_string(),
                mode: None,
            }
        );

        let frame: ClientFrame =
            serde_json::from_value(json!({"type": "leave_session", "session_id": "s1"})).unwrap();
        assert_eq!(
            frame,
            ClientFrame::LeaveSession {
                session_id: "s1".to_string()
            }
        );

        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "send_tool_call",
            "tool": "WebSearch",
            "input": "entropy"
        }))
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::SendToolCall {
                tool: "WebSearch".to_string(),
                input: json!("entropy"),
                output: serde_json::Value::Null,
            }
        );

        assert!(serde_json::from_value::<ClientFrame>(json!({"type": "shout"})).is_err());
    }

    #[tokio::test]
    async fn test_health_route() {
        let hub = Arc::new(
            ChatHub::new(&HubConfig::test_config(), Arc::new(MockAgentFactory::new())).unwrap(),
        );
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes(hub))
            .await;

        assert_eq!(response.status(), 200);
        let body: HealthStatus = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body.status, "ok");
        assert_eq!(body.sessions, 0);
    }
}
