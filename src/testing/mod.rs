//! Testing utilities and mock implementations
//!
//! Scripted agents, an agent factory with failure injection and a recording
//! event sink, so the hub can be exercised without a language model or
//! network clients.

pub mod mocks;

pub use mocks::*;
