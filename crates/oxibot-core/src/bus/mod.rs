//! In-process message bus connecting channels to the agent loop.
//!
//! Replaces nanobot's `bus.py` pub/sub queue.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{InboundMessage, OutboundMessage};
