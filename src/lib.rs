//! Chat hub - session-scoped streaming for multi-agent conversations
//!
//! A client sends a message for a session together with a mode. The hub
//! makes sure the session's agents exist (initializing them exactly once),
//! then either streams one agent's tokens to every subscriber of the session
//! or runs a bounded handoff between agents and replays the final answer.
//!
//! # Overview
//!
//! - [`session`]: per-session agent bindings with single-flight initialization
//! - [`dispatch`]: mode decoding and routing to the right pipeline
//! - [`streaming`]: ordered session events, subscriber groups, busy handling
//! - [`handoff`]: transfer graph and the handoff state machine
//! - [`agent`] / [`llm`]: the agent capability and its OpenAI-backed implementation
//! - [`hub`] / [`server`]: the client-facing facade and its WebSocket transport
//!
//! # Quick Start
//!
//! ```rust
//! use chathub::config::HubConfig;
//! use chathub::hub::ChatHub;
//! use chathub::testing::{MockAgentFactory, ScriptedAgent};
//! use chathub::agent::AgentRole;
//! use std::sync::Arc;
//!
//! # tokio_test_block_on(async {
//! let factory = MockAgentFactory::new()
//!     .with_agent(AgentRole::Primary, ScriptedAgent::new("TutorAgent").with_tokens(["Hel", "lo"]));
//! let hub = ChatHub::new(&HubConfig::default(), Arc::new(factory)).unwrap();
//!
//! let (connection, mut events) = hub.connect();
//! hub.join_session(connection, "session-1").unwrap();
//! hub.process_message("hi", "session-1", Some("direct-primary")).await.unwrap();
//!
//! while let Ok(message) = events.try_recv() {
//!     println!("{}", serde_json::to_string(&message).unwrap());
//! }
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handoff;
pub mod hub;
pub mod llm;
pub mod observability;
pub mod server;
pub mod session;
pub mod streaming;
pub mod testing;

pub use config::{ConfigError, HubConfig};
pub use dispatch::{AgentMode, DispatchOutcome};
pub use error::{HubError, HubResult};
pub use hub::ChatHub;
pub use streaming::{ConnectionId, HubEvent, HubMessage};
