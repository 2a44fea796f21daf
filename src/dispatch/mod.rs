//! Mode-based dispatch of inbound messages

pub mod dispatcher;
pub mod mode;

pub use dispatcher::*;
pub use mode::*;
