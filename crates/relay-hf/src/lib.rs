//! Hugging Face router adapter for the completion contract.
//!
//! Talks to the OpenAI-compatible `/v1/chat/completions` endpoint and
//! normalizes event-stream and whole-JSON responses into one chunk stream.

mod client;
pub mod wire;

pub use client::{HealthReport, HfClient, HfClientConfig, DEFAULT_HUB_URL};
