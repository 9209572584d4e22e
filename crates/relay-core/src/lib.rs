//! Core of the Telegram LLM relay.
//!
//! This crate is framework-agnostic. Telegram and the completion endpoint
//! live behind ports (traits) implemented in adapter crates.

pub mod completion;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod history;
pub mod logging;
pub mod maintenance;
pub mod messaging;
pub mod security;
pub mod streaming;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
