//! Error types for the chat hub
//!
//! Maps every failure the hub can encounter onto the client-facing error
//! taxonomy: usage errors are recovered locally, everything else is surfaced
//! to the session as an `error` event followed by `streamingCompleted`.

use crate::agent::{AgentError, AgentRole};
use crate::config::ConfigError;
use crate::handoff::GraphError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Maximum length of an error message forwarded to clients
const MAX_CLIENT_MESSAGE_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Main error type for hub operations
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Usage error: {message}")]
    Usage { message: String },

    #[error("Failed to initialize {role} agent for session {session_id}: {message}")]
    Initialization {
        session_id: String,
        role: AgentRole,
        message: String,
    },

    #[error("No {role} agent bound to session {session_id}")]
    AgentNotFound { session_id: String, role: AgentRole },

    #[error("Handoff protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Agent backend error: {0}")]
    Backend(#[from] AgentError),

    #[error("Session {session_id} already has a response in flight")]
    SessionBusy { session_id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transfer graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HubError {
    /// Create usage error
    pub fn usage<S: Into<String>>(message: S) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create initialization error for one role of a session
    pub fn initialization<S: Into<String>>(session_id: &str, role: AgentRole, message: S) -> Self {
        Self::Initialization {
            session_id: session_id.to_string(),
            role,
            message: message.into(),
        }
    }

    /// Create agent-not-found error
    pub fn agent_not_found(session_id: &str, role: AgentRole) -> Self {
        Self::AgentNotFound {
            session_id: session_id.to_string(),
            role,
        }
    }

    /// Create protocol violation error
    pub fn protocol_violation<S: Into<String>>(message: S) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create session busy error
    pub fn session_busy(session_id: &str) -> Self {
        Self::SessionBusy {
            session_id: session_id.to_string(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Usage errors never reach clients as failures
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HubError::Usage { .. })
    }

    /// Sanitized text suitable for an `error` event
    pub fn client_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Strip credentials and sensitive paths before a message leaves the process
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_CLIENT_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_CLIENT_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;
