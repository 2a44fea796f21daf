//! The agent capability consumed by the hub core
//!
//! An agent is initialized once per session with an [`AgentProfile`], then
//! either streams tokens for a direct message or answers a [`HandoffTurn`]
//! with an [`AgentReply`] that may ask to pass control to another agent.

use crate::agent::prompt::render_template;
use crate::llm::LlmError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Lazy, finite token stream produced by an agent. Not restartable.
pub type TokenStream = BoxStream<'static, Result<String, AgentError>>;

/// Errors raised by an agent capability
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("Agent initialization failed: {0}")]
    Initialization(String),

    #[error("Agent used before initialization")]
    NotInitialized,

    #[error("Token stream failed: {0}")]
    Stream(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl AgentError {
    pub fn initialization<S: Into<String>>(message: S) -> Self {
        Self::Initialization(message.into())
    }

    pub fn stream<S: Into<String>>(message: S) -> Self {
        Self::Stream(message.into())
    }
}

/// Identity an agent answers to when named as a handoff target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentIdentity(String);

impl AgentIdentity {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Name, description and instruction template for one agent role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Instruction template; `{{$key}}` placeholders are filled from `args`
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl AgentProfile {
    pub fn new<N, D, I>(name: N, description: D, instructions: I) -> Self
    where
        N: Into<String>,
        D: Into<String>,
        I: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Instructions with every template argument substituted
    pub fn rendered_instructions(&self) -> String {
        render_template(&self.instructions, &self.args)
    }

    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity::new(self.name.clone())
    }
}

/// One utterance in a handoff transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub agent: AgentIdentity,
    pub text: String,
}

/// A transfer the active agent is allowed to request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOption {
    pub target: AgentIdentity,
    pub trigger: String,
}

/// Input handed to the active agent on each handoff step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoffTurn {
    pub message: String,
    pub transcript: Vec<TurnRecord>,
    pub transfer_options: Vec<TransferOption>,
}

/// Request to move control to another agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub target: AgentIdentity,
    pub reason: String,
}

/// Tool invocation performed by an agent while replying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
}

/// Structured reply to a handoff turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentReply {
    pub text: String,
    pub transfer: Option<TransferRequest>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl AgentReply {
    /// Final answer, no transfer
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Hand control to `target`
    pub fn transfer<T: Into<AgentIdentity>, R: Into<String>>(target: T, reason: R) -> Self {
        Self {
            transfer: Some(TransferRequest {
                target: target.into(),
                reason: reason.into(),
            }),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, record: ToolCallRecord) -> Self {
        self.tool_calls.push(record);
        self
    }

    pub fn requests_transfer(&self) -> bool {
        self.transfer.is_some()
    }
}

/// Conversational agent capability
#[async_trait]
pub trait Agent: Send + Sync {
    /// Prepare the agent with its profile. Called once per session binding.
    async fn initialize(&self, profile: &AgentProfile) -> Result<(), AgentError>;

    /// Produce a token stream answering `input`. Failures surface as stream items.
    fn stream_tokens(&self, input: &str) -> TokenStream;

    /// Answer one handoff step
    async fn respond(&self, turn: &HandoffTurn) -> Result<AgentReply, AgentError>;

    /// Name this agent is addressed by in transfer requests
    fn identity(&self) -> AgentIdentity;

    /// Drop any resources held by the agent
    async fn release(&self) {}
}
