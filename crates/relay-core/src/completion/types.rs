use std::pin::Pin;

use futures::Stream;

use crate::{completion::error::CompletionError, domain::ConversationTurn};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

/// Normalized request for a single completion: system turn first, newest turn last.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub turns: Vec<ConversationTurn>,
    pub sampling: SamplingParams,
}

/// One item of the normalized chunk sequence.
///
/// Both upstream response shapes (event-stream deltas and a single JSON
/// payload) are reduced to `Chunk*` followed by exactly one `End` or `Error`.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    End,
    Error(CompletionError),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
