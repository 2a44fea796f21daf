//! Chat hub facade
//!
//! Owns the session registry, the subscriber groups and the pipelines, and
//! exposes the inbound operations clients invoke: processing a message,
//! joining and leaving sessions, and reporting tool calls back to a caller.

use crate::config::HubConfig;
use crate::dispatch::{AgentMode, DispatchOutcome, Dispatcher};
use crate::error::{HubError, HubResult};
use crate::handoff::HandoffOrchestrator;
use crate::observability::metrics;
use crate::session::{AgentFactory, SessionRegistry};
use crate::streaming::{
    Broadcaster, ConnectionId, HubEvent, HubMessage, SessionLanes, SubscriberGroups,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

/// Entry point for client operations
pub struct ChatHub {
    default_mode: AgentMode,
    groups: Arc<SubscriberGroups>,
    dispatcher: Dispatcher,
}

impl ChatHub {
    /// Wire the hub from configuration.
    ///
    /// Fails when the configured transfer graph is invalid.
    pub fn new(config: &HubConfig, factory: Arc<dyn AgentFactory>) -> HubResult<Self> {
        let graph = Arc::new(config.handoff.graph()?);
        let groups = Arc::new(SubscriberGroups::new());

        let broadcaster = Arc::new(
            Broadcaster::new(groups.clone()).with_chunk_delay(config.streaming.chunk_delay()),
        );
        let orchestrator = Arc::new(
            HandoffOrchestrator::new(graph, Arc::clone(&broadcaster))
                .with_max_transfers(config.handoff.max_transfers)
                .with_word_pacing(config.handoff.word_pacing()),
        );
        let registry = Arc::new(SessionRegistry::new(factory, config.agents.profiles()));
        let lanes = Arc::new(SessionLanes::new(config.streaming.busy_policy));

        info!(
            default_mode = %config.dispatch.default_mode,
            busy_policy = ?config.streaming.busy_policy,
            max_transfers = config.handoff.max_transfers,
            "Chat hub ready"
        );

        Ok(Self {
            default_mode: config.dispatch.default_mode,
            groups,
            dispatcher: Dispatcher::new(registry, lanes, broadcaster, orchestrator),
        })
    }

    pub fn default_mode(&self) -> AgentMode {
        self.default_mode
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.dispatcher.registry()
    }

    pub fn orchestrator(&self) -> &Arc<HandoffOrchestrator> {
        self.dispatcher.orchestrator()
    }

    pub fn groups(&self) -> &Arc<SubscriberGroups> {
        &self.groups
    }

    /// Register a client connection
    pub fn connect(&self) -> (ConnectionId, UnboundedReceiver<HubMessage>) {
        metrics().connection_opened();
        self.groups.connect()
    }

    pub fn disconnect(&self, connection: ConnectionId) {
        metrics().connection_closed();
        self.groups.disconnect(connection);
    }

    /// Subscribe a connection to a session's events
    pub fn join_session(&self, connection: ConnectionId, session_id: &str) -> HubResult<()> {
        let session_id = require_session_id(session_id)?;
        if !self.groups.join(connection, session_id) {
            return Err(HubError::usage(format!("unknown connection {connection}")));
        }
        Ok(())
    }

    pub fn leave_session(&self, connection: ConnectionId, session_id: &str) -> HubResult<()> {
        let session_id = require_session_id(session_id)?;
        self.groups.leave(connection, session_id);
        Ok(())
    }

    /// Process one user message for a session.
    ///
    /// An absent or unknown `mode` falls back to the configured default. Errors
    /// returned here concern the caller only; everything that happens inside
    /// the session is reported to its subscribers.
    pub async fn process_message(
        &self,
        message: &str,
        session_id: &str,
        mode: Option<&str>,
    ) -> HubResult<DispatchOutcome> {
        let session_id = require_session_id(session_id)?;
        let mode = AgentMode::resolve(mode, self.default_mode);
        debug!(session_id, %mode, "Processing message");
        self.dispatcher.dispatch(session_id, message, mode).await
    }

    /// Send a tool call notification to the calling connection only
    pub fn send_tool_call(
        &self,
        connection: ConnectionId,
        tool: &str,
        input: serde_json::Value,
        output: serde_json::Value,
    ) -> bool {
        self.groups.send_to(
            connection,
            HubMessage::direct(HubEvent::ToolCall {
                tool: tool.to_string(),
                input,
                output,
            }),
        )
    }

    /// Tell one connection about an error that concerns only it
    pub fn report_to(&self, connection: ConnectionId, error: &HubError) -> bool {
        self.groups.send_to(
            connection,
            HubMessage::direct(HubEvent::error(error.client_message())),
        )
    }
}

fn require_session_id(session_id: &str) -> HubResult<&str> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        return Err(HubError::usage("session id must not be empty"));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::GraphError;
    use crate::testing::mocks::MockAgentFactory;
    use serde_json::json;

    fn hub() -> ChatHub {
        ChatHub::new(&HubConfig::test_config(), Arc::new(MockAgentFactory::new())).unwrap()
    }

    #[test]
    fn test_invalid_graph_is_rejected() {
        let mut config = HubConfig::test_config();
        config.handoff.rules.pop();

        let result = ChatHub::new(&config, Arc::new(MockAgentFactory::new()));
        assert!(matches!(
            result,
            Err(HubError::Graph(GraphError::StrandedRole(_)))
        ));
    }

    #[tokio::test]
    async fn test_blank_session_id_is_a_usage_error() {
        let hub = hub();
        let result = hub.process_message("hello", "  ", None).await;
        assert!(matches!(result, Err(HubError::Usage { .. })));
        assert!(hub.join_session(ConnectionId::new(), "").is_err());
    }

    #[test]
    fn test_join_requires_known_connection() {
        let hub = hub();
        assert!(hub.join_session(ConnectionId::new(), "s1").is_err());

        let (connection, _rx) = hub.connect();
        assert!(hub.join_session(connection, "s1").is_ok());
        assert_eq!(hub.groups().members("s1"), 1);

        hub.leave_session(connection, "s1").unwrap();
        assert_eq!(hub.groups().members("s1"), 0);
    }

    #[test]
    fn test_tool_call_goes_to_caller_only() {
        let hub = hub();
        let (caller, mut caller_rx) = hub.connect();
        let (other, mut other_rx) = hub.connect();
        hub.join_session(caller, "s1").unwrap();
        hub.join_session(other, "s1").unwrap();

        assert!(hub.send_tool_call(caller, "WebSearch", json!("entropy"), json!(["a"])));

        let message = caller_rx.try_recv().unwrap();
        assert!(message.session_id.is_none());
        assert_eq!(message.event.name(), "toolCall");
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_report_to_unknown_connection_fails() {
        let hub = hub();
        assert!(!hub.report_to(ConnectionId::new(), &HubError::session_busy("s1")));
    }
}
