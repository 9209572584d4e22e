use std::{sync::Arc, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use relay_core::{
    completion::{
        retry::{retry_with_backoff, RetryPolicy},
        stats::{ApiStats, ApiStatsSnapshot},
        ChunkStream, CompletionClient, CompletionError, CompletionErrorKind, CompletionRequest,
        StreamEvent,
    },
    config::Config,
    formatting::truncate_with_ellipsis,
    Error, Result,
};

use crate::wire::{api_error_message, ChatRequest, FullResponse, StreamChunk};

pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";

#[derive(Clone, Debug)]
pub struct HfClientConfig {
    pub api_url: String,
    pub hub_url: String,
    pub model: String,
    pub token: String,
    pub retry: RetryPolicy,
    /// Ceiling for the whole exchange, retries and streaming included.
    pub request_timeout: Duration,
    /// Ceiling for one attempt to receive response headers. Never above
    /// `request_timeout`.
    pub attempt_timeout: Duration,
    pub connect_timeout: Duration,
    pub health_timeout: Duration,
}

impl HfClientConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            api_url: cfg.hf_api_url.clone(),
            hub_url: DEFAULT_HUB_URL.to_string(),
            model: cfg.hf_model.clone(),
            token: cfg.hf_token.clone(),
            retry: cfg.retry_policy(),
            request_timeout: cfg.request_timeout,
            attempt_timeout: cfg
                .attempt_timeout
                .unwrap_or(cfg.request_timeout)
                .min(cfg.request_timeout),
            connect_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of probing the model metadata endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthReport {
    pub status: Option<u16>,
    pub latency: Duration,
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_online(&self) -> bool {
        self.status == Some(200)
    }
}

/// Chat completions over the Hugging Face router (OpenAI-compatible).
pub struct HfClient {
    http: reqwest::Client,
    cfg: HfClientConfig,
    stats: Arc<ApiStats>,
}

impl HfClient {
    pub fn new(cfg: HfClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(cfg.connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        info!(model = %cfg.model, url = %cfg.api_url, "completion client ready");
        Ok(Self {
            http,
            cfg,
            stats: Arc::new(ApiStats::new()),
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    pub async fn health_check(&self) -> HealthReport {
        let url = format!(
            "{}/api/models/{}",
            self.cfg.hub_url.trim_end_matches('/'),
            self.cfg.model
        );
        let started = Instant::now();
        let request = self.http.get(url).bearer_auth(&self.cfg.token).send();

        let (status, error) = match timeout(self.cfg.health_timeout, request).await {
            Ok(Ok(resp)) => (Some(resp.status().as_u16()), None),
            Ok(Err(e)) => (None, Some(self.redact(&e.to_string()))),
            Err(_) => (None, Some("timed out".to_string())),
        };
        let report = HealthReport {
            status,
            latency: started.elapsed(),
            error,
        };
        debug!(?report, "health check");
        report
    }

    async fn send_once(
        &self,
        body: Vec<u8>,
        attempt: u32,
    ) -> std::result::Result<reqwest::Response, CompletionError> {
        let send = self
            .http
            .post(&self.cfg.api_url)
            .bearer_auth(&self.cfg.token)
            .header(ACCEPT, "text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send();

        let response = match timeout(self.cfg.attempt_timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(self.map_transport_error(&e)),
            Err(_) => {
                return Err(CompletionError::timeout(format!(
                    "no response within {}s",
                    self.cfg.attempt_timeout.as_secs_f32()
                )))
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(attempt, status = status.as_u16(), "completion response opened");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = CompletionError::from_status(status.as_u16());
        error!(
            attempt,
            status = status.as_u16(),
            kind = %err.kind,
            body = %self.redact(&truncate_with_ellipsis(&body, 300)),
            "upstream returned error"
        );
        Err(err)
    }

    fn map_transport_error(&self, e: &reqwest::Error) -> CompletionError {
        let msg = self.redact(&e.to_string());
        if e.is_timeout() {
            CompletionError::timeout(msg)
        } else {
            CompletionError::network(msg)
        }
    }

    fn redact(&self, s: &str) -> String {
        if self.cfg.token.is_empty() {
            return s.to_string();
        }
        s.replace(&self.cfg.token, "***HF_TOKEN***")
    }
}

#[async_trait]
impl CompletionClient for HfClient {
    async fn stream_completion(
        &self,
        req: CompletionRequest,
    ) -> std::result::Result<ChunkStream, CompletionError> {
        let started = Instant::now();
        let deadline = started + self.cfg.request_timeout;

        let body = serde_json::to_vec(&ChatRequest::streaming(&self.cfg.model, &req))
            .map_err(|e| CompletionError::malformed(format!("request encoding: {e}")))?;
        debug!(
            model = %self.cfg.model,
            turns = req.turns.len(),
            max_tokens = req.sampling.max_tokens,
            "sending completion request"
        );

        let opened = timeout_at(
            deadline,
            retry_with_backoff(&self.cfg.retry, |attempt| {
                self.send_once(body.clone(), attempt)
            }),
        )
        .await;

        let response = match opened {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                self.stats.record_failure();
                return Err(e);
            }
            Err(_) => {
                self.stats.record_failure();
                error!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "completion request exceeded deadline"
                );
                return Err(CompletionError::timeout(format!(
                    "request exceeded {}s deadline",
                    self.cfg.request_timeout.as_secs()
                )));
            }
        };

        Ok(normalize(response, started, deadline, self.stats.clone()))
    }

    fn stats(&self) -> ApiStatsSnapshot {
        self.stats.snapshot()
    }
}

enum SseData {
    Skip,
    Chunk { content: Option<String>, stop: bool },
    Error(CompletionError),
}

fn parse_sse_data(data: &str) -> SseData {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, data = %truncate_with_ellipsis(data, 100), "malformed stream event skipped");
            return SseData::Skip;
        }
    };
    if let Some(message) = api_error_message(&value) {
        return SseData::Error(CompletionError::new(CompletionErrorKind::Other, message));
    }
    match serde_json::from_value::<StreamChunk>(value) {
        Ok(chunk) => SseData::Chunk {
            content: chunk.content().map(str::to_string),
            stop: chunk.is_stop(),
        },
        Err(e) => {
            warn!(error = %e, "unexpected stream event shape skipped");
            SseData::Skip
        }
    }
}

fn parse_full(raw: &str) -> std::result::Result<String, CompletionError> {
    let body: FullResponse = serde_json::from_str(raw).map_err(|e| {
        error!(body = %truncate_with_ellipsis(raw, 200), "unparseable completion body");
        CompletionError::malformed(format!("invalid JSON body: {e}"))
    })?;

    if let Some(u) = body.usage {
        info!(
            prompt_tokens = u.prompt_tokens,
            completion_tokens = u.completion_tokens,
            total_tokens = u.total_tokens,
            "usage"
        );
    }

    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::malformed("response has no choices"))?;
    Ok(choice.message.content.unwrap_or_default())
}

/// Reduce either response shape to `Chunk* (End | Error)`.
fn normalize(
    response: reqwest::Response,
    started: Instant,
    deadline: Instant,
    stats: Arc<ApiStats>,
) -> ChunkStream {
    let is_sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    Box::pin(stream! {
        let mut chars = 0usize;
        let mut chunks = 0usize;
        let mut visible = false;

        let outcome: std::result::Result<(), CompletionError> = if is_sse {
            let mut events = response.bytes_stream().eventsource();
            loop {
                let event = match timeout_at(deadline, events.next()).await {
                    Err(_) => break Err(CompletionError::timeout("stream exceeded request deadline")),
                    Ok(None) => {
                        debug!(chunks, "event stream closed without terminator");
                        break Ok(());
                    }
                    Ok(Some(Err(e))) => {
                        break Err(CompletionError::network(format!("event stream broke: {e}")))
                    }
                    Ok(Some(Ok(event))) => event,
                };

                let data = event.data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    break Ok(());
                }

                match parse_sse_data(data) {
                    SseData::Skip => continue,
                    SseData::Error(e) => break Err(e),
                    SseData::Chunk { content, stop } => {
                        if let Some(text) = content.filter(|c| !c.is_empty()) {
                            chars += text.chars().count();
                            chunks += 1;
                            visible |= !text.trim().is_empty();
                            yield StreamEvent::Chunk(text);
                        }
                        if stop {
                            break Ok(());
                        }
                    }
                }
            }
        } else {
            match timeout_at(deadline, response.text()).await {
                Err(_) => Err(CompletionError::timeout("body exceeded request deadline")),
                Ok(Err(e)) => Err(CompletionError::network(format!("body read failed: {e}"))),
                Ok(Ok(raw)) => match parse_full(&raw) {
                    Ok(text) => {
                        if !text.is_empty() {
                            chars = text.chars().count();
                            chunks = 1;
                            visible = !text.trim().is_empty();
                            yield StreamEvent::Chunk(text);
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            }
        };

        let outcome = outcome.and_then(|()| {
            if visible {
                Ok(())
            } else {
                Err(CompletionError::empty())
            }
        });

        match outcome {
            Ok(()) => {
                let latency = started.elapsed();
                stats.record_success(chars, latency);
                info!(
                    chars,
                    chunks,
                    latency_ms = latency.as_millis() as u64,
                    streamed = is_sse,
                    "completion finished"
                );
                yield StreamEvent::End;
            }
            Err(e) => {
                stats.record_failure();
                error!(kind = %e.kind, error = %e, chunks, "completion stream failed");
                yield StreamEvent::Error(e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_data_classification() {
        assert!(matches!(parse_sse_data("{not json"), SseData::Skip));
        assert!(matches!(
            parse_sse_data(r#"{"error":{"message":"boom"}}"#),
            SseData::Error(e) if e.message == "boom"
        ));
        match parse_sse_data(r#"{"choices":[{"delta":{"content":"x"},"finish_reason":"stop"}]}"#) {
            SseData::Chunk { content, stop } => {
                assert_eq!(content.as_deref(), Some("x"));
                assert!(stop);
            }
            _ => panic!("expected chunk"),
        }
    }

    #[test]
    fn full_body_parsing() {
        assert_eq!(
            parse_full(r#"{"choices":[{"message":{"content":"whole"}}],"usage":{"total_tokens":3}}"#)
                .unwrap(),
            "whole"
        );
        assert_eq!(
            parse_full(r#"{"choices":[]}"#).unwrap_err().kind,
            CompletionErrorKind::MalformedResponse
        );
        assert_eq!(
            parse_full("<html>").unwrap_err().kind,
            CompletionErrorKind::MalformedResponse
        );
    }

    #[test]
    fn attempt_bound_defaults_to_request_deadline() {
        let cfg = HfClientConfig::from_config(&Config::default());
        assert_eq!(cfg.request_timeout, Duration::from_secs(90));
        assert_eq!(cfg.attempt_timeout, Duration::from_secs(90));

        let cfg = HfClientConfig::from_config(&Config {
            attempt_timeout: Some(Duration::from_secs(20)),
            ..Config::default()
        });
        assert_eq!(cfg.attempt_timeout, Duration::from_secs(20));

        let cfg = HfClientConfig::from_config(&Config {
            request_timeout: Duration::from_secs(10),
            attempt_timeout: Some(Duration::from_secs(60)),
            ..Config::default()
        });
        assert_eq!(cfg.attempt_timeout, Duration::from_secs(10));
    }

    #[test]
    fn redacts_token_from_messages() {
        let client = HfClient::new(HfClientConfig {
            token: "hf_secret".to_string(),
            ..HfClientConfig::from_config(&Config::default())
        })
        .unwrap();
        assert_eq!(
            client.redact("bad header Bearer hf_secret"),
            "bad header Bearer ***HF_TOKEN***"
        );
    }
}
