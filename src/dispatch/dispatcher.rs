//! Mode dispatcher
//!
//! Takes the session lane, makes sure the session's agents exist, then hands
//! the message to the direct streaming pipeline or the handoff orchestrator.
//! Every path that reaches a session ends with exactly one
//! `streamingCompleted`.

use crate::dispatch::mode::AgentMode;
use crate::error::{HubError, HubResult};
use crate::handoff::{HandoffOrchestrator, HandoffOutcome};
use crate::observability::metrics;
use crate::session::SessionRegistry;
use crate::session_span;
use crate::streaming::{BroadcastOutcome, Broadcaster, SessionLanes};
use std::sync::Arc;
use tracing::{debug, Instrument};

/// Result of dispatching one message
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Empty message; acknowledged with started + completed only
    Ignored,
    /// A direct mode streamed from one agent
    Streamed(BroadcastOutcome),
    /// The handoff protocol ran
    HandedOff(HandoffOutcome),
    /// The session was told about an error before any streaming began
    Failed { message: String },
}

/// Routes messages to the pipeline their mode selects
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    lanes: Arc<SessionLanes>,
    broadcaster: Arc<Broadcaster>,
    orchestrator: Arc<HandoffOrchestrator>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        lanes: Arc<SessionLanes>,
        broadcaster: Arc<Broadcaster>,
        orchestrator: Arc<HandoffOrchestrator>,
    ) -> Self {
        Self {
            registry,
            lanes,
            broadcaster,
            orchestrator,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<HandoffOrchestrator> {
        &self.orchestrator
    }

    /// Dispatch one message.
    ///
    /// Only `SessionBusy` is returned as an error; it concerns the caller and
    /// nothing is sent to the session. Every other failure is reported to the
    /// session and comes back as [`DispatchOutcome::Failed`].
    pub async fn dispatch(
        &self,
        session_id: &str,
        message: &str,
        mode: AgentMode,
    ) -> HubResult<DispatchOutcome> {
        let lane = self.lanes.acquire(session_id).await?;

        async {
            metrics().message_dispatched();

            if message.trim().is_empty() {
                debug!(session_id, "Ignoring empty message");
                metrics().message_ignored();
                self.broadcaster.signal_ignored(&lane).await;
                return Ok(DispatchOutcome::Ignored);
            }

            let agents = match self.registry.ensure_initialized(session_id).await {
                Ok(agents) => agents,
                Err(error) => return Ok(self.fail(session_id, error).await),
            };

            let outcome = match mode.target_role() {
                Some(role) => {
                    let binding = match agents.binding(role) {
                        Ok(binding) => binding,
                        Err(error) => return Ok(self.fail(session_id, error).await),
                    };
                    debug!(session_id, %role, "Streaming from agent");
                    let tokens = binding.agent.stream_tokens(message);
                    DispatchOutcome::Streamed(self.broadcaster.stream(&lane, tokens).await)
                }
                None => {
                    let run = self
                        .orchestrator
                        .run_and_signal(&lane, &agents, message)
                        .await;
                    DispatchOutcome::HandedOff(run.outcome)
                }
            };

            Ok(outcome)
        }
        .instrument(session_span!(session_id = %session_id, mode = %mode))
        .await
    }

    async fn fail(&self, session_id: &str, error: HubError) -> DispatchOutcome {
        self.broadcaster.signal_failure(session_id, &error).await;
        DispatchOutcome::Failed {
            message: error.client_message(),
        }
    }
}
