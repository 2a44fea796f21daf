//! Streaming broadcaster and session fan-out
//!
//! Token streams are drained into ordered [`HubEvent`]s that reach every
//! connection subscribed to the session.

pub mod broadcaster;
pub mod events;
pub mod lanes;
pub mod sink;
pub mod state;
pub mod subscribers;

pub use broadcaster::*;
pub use events::*;
pub use lanes::*;
pub use sink::EventSink;
pub use state::StreamingState;
pub use subscribers::*;
