//! Agent capability layer
//!
//! The `Agent` trait is the seam between the hub core and whatever produces
//! text: a language model, a scripted test double, or anything else that can
//! stream tokens and answer handoff turns.

pub mod capability;
pub mod llm_agent;
pub mod prompt;
pub mod role;

pub use capability::*;
pub use llm_agent::*;
pub use prompt::render_template;
pub use role::*;
