//! Rule-based handoff between orchestration-capable agents

pub mod graph;
pub mod orchestrator;

pub use graph::*;
pub use orchestrator::*;
