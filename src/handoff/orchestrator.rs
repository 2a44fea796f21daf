//! Handoff orchestrator
//!
//! Runs a bounded control-transfer protocol between the session's
//! orchestration-capable agents:
//!
//! ```text
//! Idle -> Running(start) -> Transferring{from,to} -> Running(to) -> ... -> Completed | Failed
//! ```
//!
//! The active agent either answers (the run completes with its text) or asks
//! to transfer. A transfer only executes when the graph declares the edge;
//! anything else is a protocol violation. The number of executed transfers
//! is capped so a ping-pong between agents always terminates.

use crate::agent::{AgentError, AgentIdentity, AgentRole, HandoffTurn, TransferOption, TurnRecord};
use crate::error::HubError;
use crate::handoff::graph::TransferGraph;
use crate::handoff_span;
use crate::observability::metrics;
use crate::session::SessionAgents;
use crate::streaming::{BroadcastOutcome, Broadcaster, HubEvent, SessionLane};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Default cap on executed transfers per run
pub const DEFAULT_MAX_TRANSFERS: usize = 8;

/// Default pause between replayed words
pub const DEFAULT_WORD_PACING: Duration = Duration::from_millis(50);

/// Position of a run in the handoff state machine
#[derive(Debug, Clone, PartialEq)]
pub enum HandoffState {
    Idle,
    Running(AgentRole),
    Transferring { from: AgentRole, to: AgentRole },
    Completed(String),
    Failed(FailureReason),
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// The active agent asked for a transfer the graph does not declare
    UndeclaredTransfer {
        from: AgentRole,
        target: AgentIdentity,
    },
    /// Another transfer was requested after the cap was reached
    TransferLimitExceeded { limit: usize },
    /// The role is part of the graph but has no bound agent
    MissingAgent(AgentRole),
    /// The active agent failed to reply
    Backend { role: AgentRole, error: AgentError },
}

impl FailureReason {
    pub fn to_error(&self, session_id: &str) -> HubError {
        match self {
            FailureReason::UndeclaredTransfer { from, target } => HubError::protocol_violation(
                format!("{from} agent requested undeclared transfer to '{target}'"),
            ),
            FailureReason::TransferLimitExceeded { limit } => HubError::protocol_violation(
                format!("handoff exceeded the limit of {limit} transfers"),
            ),
            FailureReason::MissingAgent(role) => HubError::agent_not_found(session_id, *role),
            FailureReason::Backend { error, .. } => HubError::Backend(error.clone()),
        }
    }
}

/// Record of one executed transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffData {
    pub from: AgentRole,
    pub to: AgentRole,
    pub reason: String,
}

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq)]
pub enum HandoffOutcome {
    Completed {
        text: String,
        agent: AgentRole,
    },
    Failed {
        reason: FailureReason,
        /// Set when the run was cut short by the transfer cap
        truncated: bool,
    },
    /// The run completed but every subscriber left during the word replay
    Abandoned {
        text: String,
        agent: AgentRole,
    },
}

impl HandoffOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, HandoffOutcome::Completed { .. })
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct HandoffRun {
    pub states: Vec<HandoffState>,
    pub transfers: Vec<HandoffData>,
    pub turns: Vec<TurnRecord>,
    pub outcome: HandoffOutcome,
}

/// Ephemeral execution context of one run.
///
/// Counted in the orchestrator's live-runtime gauge from creation until it is
/// shut down or dropped.
pub struct HandoffRuntime {
    id: Uuid,
    session_id: String,
    live: Arc<AtomicUsize>,
    running: bool,
    turns: Vec<TurnRecord>,
}

impl HandoffRuntime {
    fn start(session_id: &str, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        let id = Uuid::new_v4();
        debug!(%id, session_id, "Handoff runtime started");
        Self {
            id,
            session_id: session_id.to_string(),
            live,
            running: true,
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Tear down and return the transcript
    fn shutdown(mut self) -> Vec<TurnRecord> {
        self.teardown();
        std::mem::take(&mut self.turns)
    }

    fn teardown(&mut self) {
        if self.running {
            self.running = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
            debug!(id = %self.id, session_id = %self.session_id, "Handoff runtime stopped");
        }
    }
}

impl Drop for HandoffRuntime {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Drives handoff runs over a validated transfer graph
pub struct HandoffOrchestrator {
    graph: Arc<TransferGraph>,
    broadcaster: Arc<Broadcaster>,
    max_transfers: usize,
    word_pacing: Duration,
    live: Arc<AtomicUsize>,
}

impl HandoffOrchestrator {
    pub fn new(graph: Arc<TransferGraph>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            graph,
            broadcaster,
            max_transfers: DEFAULT_MAX_TRANSFERS,
            word_pacing: DEFAULT_WORD_PACING,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_max_transfers(mut self, max_transfers: usize) -> Self {
        self.max_transfers = max_transfers;
        self
    }

    pub fn with_word_pacing(mut self, word_pacing: Duration) -> Self {
        self.word_pacing = word_pacing;
        self
    }

    pub fn graph(&self) -> &TransferGraph {
        &self.graph
    }

    /// Runtimes that have not been torn down yet
    pub fn active_runtimes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Run the protocol for `message` without start/finish signalling.
    ///
    /// Tool calls reported by agents are forwarded to the session as they
    /// happen.
    pub async fn run(&self, agents: &SessionAgents, message: &str) -> HandoffRun {
        let session_id = agents.session_id();
        self.execute(agents, message)
            .instrument(handoff_span!(session_id = %session_id, start = %self.graph.start()))
            .await
    }

    async fn execute(&self, agents: &SessionAgents, message: &str) -> HandoffRun {
        let session_id = agents.session_id();
        let mut runtime = HandoffRuntime::start(session_id, Arc::clone(&self.live));
        let mut states = vec![HandoffState::Idle];
        let mut transfers: Vec<HandoffData> = Vec::new();
        let mut active = self.graph.start();

        let outcome = loop {
            states.push(HandoffState::Running(active));

            let binding = match agents.binding(active) {
                Ok(binding) => binding,
                Err(_) => {
                    break HandoffOutcome::Failed {
                        reason: FailureReason::MissingAgent(active),
                        truncated: false,
                    }
                }
            };

            let turn = HandoffTurn {
                message: message.to_string(),
                transcript: runtime.turns.clone(),
                transfer_options: self.transfer_options(agents, active),
            };

            let reply = match binding.agent.respond(&turn).await {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(session_id, role = %active, error = %error, "Agent failed during handoff");
                    break HandoffOutcome::Failed {
                        reason: FailureReason::Backend { role: active, error },
                        truncated: false,
                    };
                }
            };

            for call in &reply.tool_calls {
                self.broadcaster
                    .emit(
                        session_id,
                        HubEvent::ToolCall {
                            tool: call.tool.clone(),
                            input: call.input.clone(),
                            output: call.output.clone(),
                        },
                    )
                    .await;
            }

            if !reply.text.is_empty() {
                runtime.turns.push(TurnRecord {
                    agent: binding.agent.identity(),
                    text: reply.text.clone(),
                });
            }

            let Some(request) = reply.transfer else {
                break HandoffOutcome::Completed {
                    text: reply.text,
                    agent: active,
                };
            };

            let target = agents
                .role_of(&request.target)
                .filter(|to| self.graph.permits(active, *to));

            let Some(to) = target else {
                warn!(session_id, from = %active, target = %request.target, "Undeclared transfer requested");
                break HandoffOutcome::Failed {
                    reason: FailureReason::UndeclaredTransfer {
                        from: active,
                        target: request.target,
                    },
                    truncated: false,
                };
            };

            if transfers.len() >= self.max_transfers {
                warn!(session_id, limit = self.max_transfers, "Transfer limit reached");
                break HandoffOutcome::Failed {
                    reason: FailureReason::TransferLimitExceeded {
                        limit: self.max_transfers,
                    },
                    truncated: true,
                };
            }

            debug!(session_id, from = %active, %to, reason = %request.reason, "Transferring control");
            states.push(HandoffState::Transferring { from: active, to });
            transfers.push(HandoffData {
                from: active,
                to,
                reason: request.reason,
            });
            metrics().transfer_executed();
            active = to;
        };

        states.push(match &outcome {
            HandoffOutcome::Completed { text, .. } | HandoffOutcome::Abandoned { text, .. } => {
                HandoffState::Completed(text.clone())
            }
            HandoffOutcome::Failed { reason, .. } => HandoffState::Failed(reason.clone()),
        });

        match &outcome {
            HandoffOutcome::Completed { agent, .. } | HandoffOutcome::Abandoned { agent, .. } => {
                metrics().handoff_completed();
                info!(session_id, agent = %agent, transfers = transfers.len(), "Handoff completed");
            }
            HandoffOutcome::Failed { .. } => metrics().handoff_failed(),
        }

        HandoffRun {
            states,
            transfers,
            turns: runtime.shutdown(),
            outcome,
        }
    }

    /// Run the protocol and signal the session.
    ///
    /// Emits `streamingStarted`, then either the replayed final text or an
    /// error, then exactly one `streamingCompleted`. A replay whose
    /// subscribers all leave is cut short and the outcome becomes
    /// [`HandoffOutcome::Abandoned`].
    pub async fn run_and_signal(
        &self,
        lane: &SessionLane,
        agents: &SessionAgents,
        message: &str,
    ) -> HandoffRun {
        let session_id = lane.session_id();
        self.broadcaster
            .emit(session_id, HubEvent::StreamingStarted)
            .await;
        let watched = self.broadcaster.is_watched(session_id);

        let mut run = self.run(agents, message).await;

        let mut abandoned = None;
        match &run.outcome {
            HandoffOutcome::Completed { text, agent } => {
                let replay = self
                    .broadcaster
                    .replay_words(lane, text, self.word_pacing, watched)
                    .await;
                if replay == BroadcastOutcome::Abandoned {
                    abandoned = Some(HandoffOutcome::Abandoned {
                        text: text.clone(),
                        agent: *agent,
                    });
                }
            }
            HandoffOutcome::Abandoned { .. } => {}
            HandoffOutcome::Failed { reason, .. } => {
                let error = reason.to_error(session_id);
                self.broadcaster
                    .emit(session_id, HubEvent::error(error.client_message()))
                    .await;
            }
        }

        if let Some(outcome) = abandoned {
            run.outcome = outcome;
        }

        self.broadcaster
            .emit(session_id, HubEvent::StreamingCompleted)
            .await;
        run
    }

    fn transfer_options(&self, agents: &SessionAgents, active: AgentRole) -> Vec<TransferOption> {
        self.graph
            .rules_from(active)
            .filter_map(|rule| {
                agents.identity_of(rule.to).map(|target| TransferOption {
                    target,
                    trigger: rule.trigger.clone(),
                })
            })
            .collect()
    }
}
