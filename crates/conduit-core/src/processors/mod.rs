//! Built-in processors

pub mod debug_flow;

pub use debug_flow::DebugFlow;
