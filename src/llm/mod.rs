//! LLM provider abstraction layer
//!
//! Provider-agnostic completion and streaming interface used by the
//! LLM-backed agent capability.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
