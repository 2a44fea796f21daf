//! Hub configuration
//!
//! Loaded from TOML. Every section is optional and falls back to the
//! defaults below; secrets are never stored in the file, only the name of
//! the environment variable that holds them.

use crate::agent::{AgentProfile, AgentRole, LlmAgentSettings};
use crate::dispatch::AgentMode;
use crate::handoff::{GraphError, HandoffRule, TransferGraph};
use crate::streaming::BusyPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level hub configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub dispatch: DispatchSection,
    pub streaming: StreamingSection,
    pub handoff: HandoffSection,
    pub agents: AgentsSection,
}

/// WebSocket server binding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl ServerSection {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "Invalid server address {}:{}: {e}",
                    self.host, self.port
                ))
            })
    }
}

/// LLM backend used by every agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSection {
    /// Provider name; only "openai" is built in
    pub provider: String,
    pub model: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    /// Override for OpenAI-compatible endpoints
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 60,
        }
    }
}

impl LlmSection {
    /// Agent model parameters derived from this section
    pub fn agent_settings(&self) -> LlmAgentSettings {
        LlmAgentSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..LlmAgentSettings::default()
        }
    }
}

/// Message dispatch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchSection {
    /// Mode used when a client sends none or an unknown one
    pub default_mode: AgentMode,
}

/// Streaming behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingSection {
    /// What happens to a second message while the session is streaming
    pub busy_policy: BusyPolicy,
    /// Pause after each forwarded chunk, in milliseconds
    pub chunk_delay_ms: u64,
}

impl StreamingSection {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

/// Handoff protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HandoffSection {
    pub start: AgentRole,
    pub max_transfers: usize,
    pub word_pacing_ms: u64,
    /// Roles allowed to have no outgoing rule
    pub absorbing: Vec<AgentRole>,
    pub rules: Vec<HandoffRule>,
}

impl Default for HandoffSection {
    fn default() -> Self {
        Self {
            start: AgentRole::Primary,
            max_transfers: crate::handoff::DEFAULT_MAX_TRANSFERS,
            word_pacing_ms: 50,
            absorbing: Vec::new(),
            rules: vec![
                HandoffRule::new(
                    AgentRole::Primary,
                    AgentRole::Secondary,
                    "Transfer to quiz agent when creating assessments or user requests quizzes",
                ),
                HandoffRule::new(
                    AgentRole::Secondary,
                    AgentRole::Primary,
                    "Transfer back to tutor for explanations after quiz or for educational content",
                ),
            ],
        }
    }
}

impl HandoffSection {
    /// Build the validated transfer graph
    pub fn graph(&self) -> Result<TransferGraph, GraphError> {
        TransferGraph::new(
            self.start,
            self.rules.clone(),
            self.absorbing.iter().copied(),
        )
    }

    pub fn word_pacing(&self) -> Duration {
        Duration::from_millis(self.word_pacing_ms)
    }
}

const LEARNER_SUBJECT: &str = "Information Theory";
const LEARNER_PROFILE: &str = "The user has a comp sci background and prefers examples.";

/// Agent profile per role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsSection {
    pub primary: Option<AgentProfile>,
    pub secondary: Option<AgentProfile>,
    pub auxiliary: Option<AgentProfile>,
}

impl Default for AgentsSection {
    fn default() -> Self {
        let tutor = AgentProfile::new(
            "TutorAgent",
            "Educational tutor that explains complex concepts and provides learning assistance",
            "You are a helpful tutor that will explain difficult concepts in {{$subject}}.\n\n\
             Here is the learning profile of the user you will be interacting with: {{$profile}}.",
        )
        .with_arg("subject", LEARNER_SUBJECT)
        .with_arg("profile", LEARNER_PROFILE);

        let quiz = AgentProfile::new(
            "QuizAgent",
            "Quiz creation assistant that generates assessments and test questions",
            "You are an assistant that will create quizzes to help test a user's understanding of {{$subject}}.\n\n\
             Here is the learning profile of the user you will be interacting with: {{$profile}}.",
        )
        .with_arg("subject", LEARNER_SUBJECT)
        .with_arg("profile", LEARNER_PROFILE);

        let assistant = AgentProfile::new(
            "AssistantAgent",
            "General purpose assistant",
            "You are a helpful assistant. The current time is {{$now}}.",
        );

        Self {
            primary: Some(tutor),
            secondary: Some(quiz),
            auxiliary: Some(assistant),
        }
    }
}

impl AgentsSection {
    /// Configured profiles keyed by role
    pub fn profiles(&self) -> BTreeMap<AgentRole, AgentProfile> {
        [
            (AgentRole::Primary, &self.primary),
            (AgentRole::Secondary, &self.secondary),
            (AgentRole::Auxiliary, &self.auxiliary),
        ]
        .into_iter()
        .filter_map(|(role, profile)| profile.clone().map(|profile| (role, profile)))
        .collect()
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid handoff graph: {0}")]
    InvalidGraph(#[from] GraphError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HubConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-section consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.provider != "openai" {
            return Err(ConfigError::InvalidConfig(format!(
                "Unsupported LLM provider '{}'",
                self.llm.provider
            )));
        }

        if let Some(temperature) = self.llm.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidConfig(format!(
                    "LLM temperature {temperature} is outside 0.0..=2.0"
                )));
            }
        }

        let profiles = self.agents.profiles();
        let mut names = BTreeSet::new();
        for (role, profile) in &profiles {
            if profile.name.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Agent profile for {role} has no name"
                )));
            }
            if !names.insert(profile.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Agent name '{}' is used by more than one role",
                    profile.name
                )));
            }
        }

        self.server.socket_addr()?;

        let graph = self.handoff.graph()?;
        if let Some(role) = graph
            .participants()
            .into_iter()
            .find(|role| !profiles.contains_key(role))
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Handoff graph uses {role} but no agent profile is configured for it"
            )));
        }

        if let Some(role) = self.dispatch.default_mode.target_role() {
            if !profiles.contains_key(&role) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Default mode {} needs a {role} agent profile",
                    self.dispatch.default_mode
                )));
            }
        }

        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.llm.api_key_env)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[server]
port = 0

[llm]
model = "gpt-4o-mini"
api_key_env = "CHATHUB_TEST_API_KEY"

[streaming]
busy_policy = "reject"

[handoff]
max_transfers = 4
word_pacing_ms = 0
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
