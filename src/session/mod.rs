//! Session registry: per-session agent bindings with single-flight initialization

pub mod registry;

pub use registry::*;
