//! Edit-in-place presentation of a streamed completion.
//!
//! The presenter accumulates chunks and, at most once per edit interval,
//! rewrites the placeholder message with the text so far plus a cursor. The
//! final render drops the cursor and is the only render whose failure is
//! reported to the caller.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::{
    completion::{ChunkStream, CompletionError, StreamEvent},
    config::Config,
    domain::MessageRef,
    messaging::port::MessagingPort,
    Error, Result,
};

#[derive(Clone, Debug)]
pub struct PresenterConfig {
    pub edit_interval: Duration,
    pub cursor: String,
    /// Hard per-message ceiling of the surface.
    pub message_limit: usize,
    /// Chunk size used for intermediate renders and overflow splits.
    pub safe_limit: usize,
}

impl PresenterConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            edit_interval: cfg.stream_edit_interval,
            cursor: cfg.typing_cursor.clone(),
            message_limit: cfg.telegram_message_limit,
            safe_limit: cfg.telegram_safe_limit,
        }
    }
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-response presentation state; never shared across requests.
#[derive(Clone, Debug)]
pub struct StreamState {
    pub accumulated: String,
    pub chunk_count: usize,
    pub last_render: Instant,
    pub started: Instant,
    last_rendered: Option<String>,
}

impl StreamState {
    pub fn new(now: Instant) -> Self {
        Self {
            accumulated: String::new(),
            chunk_count: 0,
            last_render: now,
            started: now,
            last_rendered: None,
        }
    }

    fn push(&mut self, chunk: &str) {
        self.accumulated.push_str(chunk);
        self.chunk_count += 1;
    }

    fn render_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_render) >= interval
    }
}

/// Outcome of a fully delivered response.
#[derive(Clone, Debug, PartialEq)]
pub struct PresentedResponse {
    pub text: String,
    pub chunk_count: usize,
    pub elapsed: Duration,
    /// Extra messages sent when the text overflowed one message.
    pub overflow_messages: usize,
}

pub struct StreamPresenter<'a> {
    api: &'a dyn MessagingPort,
    cfg: &'a PresenterConfig,
}

impl<'a> StreamPresenter<'a> {
    pub fn new(api: &'a dyn MessagingPort, cfg: &'a PresenterConfig) -> Self {
        Self { api, cfg }
    }

    /// Drive `stream` into `target` until it ends.
    ///
    /// Errors: `Error::Completion` for in-band upstream failures or a blank
    /// result, `Error::Presentation` when the final render cannot be
    /// delivered.
    pub async fn present(
        &self,
        target: MessageRef,
        mut stream: ChunkStream,
    ) -> Result<PresentedResponse> {
        let mut state = StreamState::new(Instant::now());

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Chunk(chunk) => {
                    state.push(&chunk);
                    if state.render_due(Instant::now(), self.cfg.edit_interval) {
                        self.render_intermediate(target, &mut state).await;
                    }
                }
                StreamEvent::End => break,
                StreamEvent::Error(err) => {
                    debug!(
                        chunks = state.chunk_count,
                        chars = state.accumulated.chars().count(),
                        "stream aborted upstream"
                    );
                    return Err(Error::Completion(err));
                }
            }
        }

        if state.accumulated.trim().is_empty() {
            return Err(Error::Completion(CompletionError::empty()));
        }

        let overflow_messages = self.render_final(target, &state.accumulated).await?;
        Ok(PresentedResponse {
            elapsed: state.started.elapsed(),
            chunk_count: state.chunk_count,
            text: state.accumulated,
            overflow_messages,
        })
    }

    /// Best-effort; only a flood-control backoff is honored.
    async fn render_intermediate(&self, target: MessageRef, state: &mut StreamState) {
        let display = format!(
            "{} {}",
            truncate_chars(&state.accumulated, self.cfg.safe_limit),
            self.cfg.cursor
        );
        if state.last_rendered.as_deref() == Some(display.as_str()) {
            return;
        }

        match self.api.edit_text(target, &display).await {
            Ok(()) => {
                state.last_render = Instant::now();
                state.last_rendered = Some(display);
            }
            Err(Error::RetryAfter(wait)) => {
                warn!(wait_ms = wait.as_millis() as u64, "edit throttled, backing off");
                sleep(wait).await;
            }
            Err(e) => {
                debug!(error = %e, "intermediate render failed");
            }
        }
    }

    /// Returns the number of follow-up messages sent for overflow.
    async fn render_final(&self, target: MessageRef, text: &str) -> Result<usize> {
        let parts = if text.chars().count() <= self.cfg.message_limit {
            vec![text.to_string()]
        } else {
            split_chars(text, self.cfg.safe_limit)
        };
        let mut parts = parts.into_iter();
        let Some(head) = parts.next() else {
            return Ok(0);
        };

        self.edit_final(target, &head).await?;

        let mut sent = 0;
        for part in parts {
            self.api
                .send_text(target.chat_id, &part)
                .await
                .map_err(|e| Error::Presentation(format!("overflow send failed: {e}")))?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn edit_final(&self, target: MessageRef, text: &str) -> Result<()> {
        match self.api.edit_text(target, text).await {
            Ok(()) => Ok(()),
            Err(Error::RetryAfter(wait)) => {
                warn!(wait_ms = wait.as_millis() as u64, "final edit throttled, retrying once");
                sleep(wait).await;
                self.api
                    .edit_text(target, text)
                    .await
                    .map_err(|e| Error::Presentation(format!("final render failed: {e}")))
            }
            Err(e) => Err(Error::Presentation(format!("final render failed: {e}"))),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn split_chars(s: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut count = 0;
    for ch in s.chars() {
        if count == max {
            out.push(std::mem::take(&mut cur));
            count = 0;
        }
        cur.push(ch);
        count += 1;
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}
