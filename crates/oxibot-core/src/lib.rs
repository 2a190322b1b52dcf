//! Core types, message bus, configuration, and utilities for Oxibot.
//!
//! Replaces nanobot's `core/` package: message envelopes, the in-process
//! pub/sub bus, session persistence, config loading, and shared helpers.

pub mod bus;
pub mod config;
pub mod heartbeat;
pub mod session;
pub mod types;
pub mod utils;

pub use bus::MessageBus;
pub use config::Config;
pub use heartbeat::HeartbeatService;
pub use session::SessionManager;
