//! Outbound message surface used by the presenter and command handlers.

pub mod pacing;
pub mod port;
pub mod types;
