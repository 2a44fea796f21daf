//! Mock implementations for testing
//!
//! Provides a scripted agent, an agent factory with failure injection and an
//! event sink that records everything it is given, so the hub can be tested
//! without a language model or network clients.

use crate::agent::{
    Agent, AgentError, AgentIdentity, AgentProfile, AgentReply, AgentRole, HandoffTurn,
    TokenStream,
};
use crate::session::AgentFactory;
use crate::streaming::{EventSink, HubEvent};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Behaviour of a [`ScriptedAgent`], shared by every copy the factory makes
#[derive(Debug, Clone, Default)]
struct AgentScript {
    tokens: Vec<Result<String, AgentError>>,
    token_delay: Option<Duration>,
    replies: VecDeque<Result<AgentReply, AgentError>>,
    repeated_reply: Option<AgentReply>,
    respond_pending: bool,
    init_error: Option<String>,
    init_delay: Option<Duration>,
}

/// Agent whose output is fixed up front
#[derive(Debug)]
pub struct ScriptedAgent {
    identity: AgentIdentity,
    script: AgentScript,
    pending_replies: Mutex<VecDeque<Result<AgentReply, AgentError>>>,
    initialized: AtomicBool,
    released: AtomicBool,
    inputs: Mutex<Vec<String>>,
    turns: Mutex<Vec<HandoffTurn>>,
}

impl ScriptedAgent {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self::from_script(AgentIdentity::new(name), AgentScript::default())
    }

    fn from_script(identity: AgentIdentity, script: AgentScript) -> Self {
        Self {
            identity,
            pending_replies: Mutex::new(script.replies.clone()),
            script,
            initialized: AtomicBool::new(false),
            released: AtomicBool::new(false),
            inputs: Mutex::new(Vec::new()),
            turns: Mutex::new(Vec::new()),
        }
    }

    /// Fresh agent with the same script and no recorded state
    pub fn spawn(&self) -> Self {
        Self::from_script(self.identity.clone(), self.script.clone())
    }

    /// Tokens yielded by every `stream_tokens` call
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script
            .tokens
            .extend(tokens.into_iter().map(|t| Ok(t.into())));
        self
    }

    /// Append a stream failure after the scripted tokens
    pub fn with_stream_error<S: Into<String>>(mut self, message: S) -> Self {
        self.script.tokens.push(Err(AgentError::stream(message)));
        self
    }

    /// Sleep before each token
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.script.token_delay = Some(delay);
        self
    }

    /// Queue a handoff reply; queued replies are used in order
    pub fn with_reply(self, reply: AgentReply) -> Self {
        self.queue_reply(Ok(reply))
    }

    /// Queue a handoff failure
    pub fn with_reply_error(self, error: AgentError) -> Self {
        self.queue_reply(Err(error))
    }

    fn queue_reply(mut self, reply: Result<AgentReply, AgentError>) -> Self {
        self.pending_replies
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply.clone());
        self.script.replies.push_back(reply);
        self
    }

    /// Reply used once the queue is exhausted
    pub fn always_reply(mut self, reply: AgentReply) -> Self {
        self.script.repeated_reply = Some(reply);
        self
    }

    /// `respond` never resolves
    pub fn respond_pending(mut self) -> Self {
        self.script.respond_pending = true;
        self
    }

    pub fn failing_initialize<S: Into<String>>(mut self, message: S) -> Self {
        self.script.init_error = Some(message.into());
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.script.init_delay = Some(delay);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Inputs passed to `stream_tokens`
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Turns passed to `respond`
    pub fn turns(&self) -> Vec<HandoffTurn> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn initialize(&self, _profile: &AgentProfile) -> Result<(), AgentError> {
        if let Some(delay) = self.script.init_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.script.init_error {
            return Err(AgentError::initialization(message.clone()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stream_tokens(&self, input: &str) -> TokenStream {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner).push(input.to_string());

        let tokens = stream::iter(self.script.tokens.clone());
        match self.script.token_delay {
            Some(delay) => tokens
                .then(move |token| async move {
                    tokio::time::sleep(delay).await;
                    token
                })
                .boxed(),
            None => tokens.boxed(),
        }
    }

    async fn respond(&self, turn: &HandoffTurn) -> Result<AgentReply, AgentError> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner).push(turn.clone());

        if self.script.respond_pending {
            futures::future::pending::<()>().await;
        }

        let queued = self.pending_replies.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match queued {
            Some(reply) => reply,
            None => Ok(self
                .script
                .repeated_reply
                .clone()
                .unwrap_or_else(|| AgentReply::text(""))),
        }
    }

    fn identity(&self) -> AgentIdentity {
        self.identity.clone()
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Agent created by [`MockAgentFactory`]
#[derive(Clone)]
pub struct CreatedAgent {
    pub session_id: String,
    pub role: AgentRole,
    pub agent: Arc<ScriptedAgent>,
}

/// Agent factory handing out scripted agents
#[derive(Default)]
pub struct MockAgentFactory {
    templates: HashMap<AgentRole, ScriptedAgent>,
    fail_creation: Mutex<HashSet<AgentRole>>,
    fail_initialization_once: Mutex<HashSet<AgentRole>>,
    created: Mutex<Vec<CreatedAgent>>,
    create_calls: AtomicUsize,
}

impl MockAgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the agent built for `role`
    pub fn with_agent(mut self, role: AgentRole, template: ScriptedAgent) -> Self {
        self.templates.insert(role, template);
        self
    }

    /// Every `create` for `role` fails
    pub fn fail_creation(&self, role: AgentRole) {
        self.fail_creation.lock().unwrap_or_else(PoisonError::into_inner).insert(role);
    }

    /// The next agent built for `role` fails to initialize
    pub fn fail_initialization_once(&self, role: AgentRole) {
        self.fail_initialization_once.lock().unwrap_or_else(PoisonError::into_inner).insert(role);
    }

    pub fn created(&self) -> Vec<CreatedAgent> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|created| created.agent.is_released())
            .count()
    }

    /// Agent built for `role` in `session_id`, most recent first
    pub fn agent_for(&self, session_id: &str, role: AgentRole) -> Option<Arc<ScriptedAgent>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|created| created.session_id == session_id && created.role == role)
            .map(|created| Arc::clone(&created.agent))
    }
}

impl AgentFactory for MockAgentFactory {
    fn create(
        &self,
        session_id: &str,
        role: AgentRole,
        profile: &AgentProfile,
    ) -> Result<Arc<dyn Agent>, AgentError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_creation.lock().unwrap_or_else(PoisonError::into_inner).contains(&role) {
            return Err(AgentError::initialization(format!(
                "cannot build {role} agent"
            )));
        }

        let mut agent = match self.templates.get(&role) {
            Some(template) => template.spawn(),
            None => ScriptedAgent::new(profile.name.clone()).with_tokens(["ok"]),
        };
        if self.fail_initialization_once.lock().unwrap_or_else(PoisonError::into_inner).remove(&role) {
            agent.script.init_error = Some(format!("{role} agent refused to start"));
        }

        let agent = Arc::new(agent);
        self.created.lock().unwrap_or_else(PoisonError::into_inner).push(CreatedAgent {
            session_id: session_id.to_string(),
            role,
            agent: Arc::clone(&agent),
        });
        Ok(agent)
    }
}

/// Event sink that records every event and fakes subscriber counts
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, HubEvent)>>,
    subscribers: Mutex<HashMap<String, usize>>,
    leave_after_chunks: Mutex<HashMap<String, usize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_subscribers(&self, session_id: &str, count: usize) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), count);
    }

    /// All subscribers of `session_id` leave once `chunks` chunks were emitted
    pub fn leave_after_chunks(&self, session_id: &str, chunks: usize) {
        self.leave_after_chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), chunks);
    }

    pub fn events(&self) -> Vec<(String, HubEvent)> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn events_for(&self, session_id: &str) -> Vec<HubEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(session, _)| session == session_id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, session_id: &str, event: HubEvent) {
        let is_chunk = matches!(event, HubEvent::StreamingChunk { .. });
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((session_id.to_string(), event));

        if is_chunk {
            let mut leave = self.leave_after_chunks.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(remaining) = leave.get_mut(session_id) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    leave.remove(session_id);
                    self.set_subscribers(session_id, 0);
                }
            }
        }
    }

    fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }
}
