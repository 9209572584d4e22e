//! Provider-agnostic completion contract: request/stream types, error
//! taxonomy, retry policy and call statistics.

pub mod client;
pub mod error;
pub mod retry;
pub mod stats;
pub mod types;

pub use client::CompletionClient;
pub use error::{CompletionError, CompletionErrorKind};
pub use types::{ChunkStream, CompletionRequest, SamplingParams, StreamEvent};
