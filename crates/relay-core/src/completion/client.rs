use async_trait::async_trait;

use super::{
    error::CompletionError,
    stats::ApiStatsSnapshot,
    types::{ChunkStream, CompletionRequest},
};

/// Upstream model endpoint used by the conversation pipeline.
///
/// Request-phase failures (after retries) come back as `Err`. Once the stream
/// is open, failures are delivered in-band as `StreamEvent::Error` so the
/// presenter can match on them.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn stream_completion(
        &self,
        req: CompletionRequest,
    ) -> Result<ChunkStream, CompletionError>;

    fn stats(&self) -> ApiStatsSnapshot;
}
