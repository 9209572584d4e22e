//! JSON shapes of the OpenAI-compatible chat completions endpoint.

use serde::{Deserialize, Serialize};

use relay_core::{completion::CompletionRequest, domain::ConversationTurn};

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ConversationTurn],
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl<'a> ChatRequest<'a> {
    pub fn streaming(model: &'a str, req: &'a CompletionRequest) -> Self {
        Self {
            model,
            messages: &req.turns,
            temperature: req.sampling.temperature,
            top_p: req.sampling.top_p,
            max_tokens: req.sampling.max_tokens,
            stream: true,
        }
    }
}

/// One `data:` payload of the event stream.
#[derive(Debug, Default, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamChunk {
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.as_deref())
    }

    pub fn is_stop(&self) -> bool {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            == Some("stop")
    }
}

/// Non-streamed response body.
#[derive(Debug, Deserialize)]
pub struct FullResponse {
    #[serde(default)]
    pub choices: Vec<FullChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct FullChoice {
    pub message: FullMessage,
}

#[derive(Debug, Deserialize)]
pub struct FullMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Pull a human-readable message out of an in-band `{"error": ...}` payload.
pub fn api_error_message(v: &serde_json::Value) -> Option<String> {
    let error = v.get("error")?;
    if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("error event in stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::completion::SamplingParams;

    #[test]
    fn request_body_matches_wire_format() {
        let req = CompletionRequest {
            turns: vec![
                ConversationTurn::system("sys"),
                ConversationTurn::user("hello"),
            ],
            sampling: SamplingParams {
                temperature: 0.5,
                top_p: 0.25,
                max_tokens: 256,
            },
        };
        let body = serde_json::to_value(ChatRequest::streaming("org/model", &req)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "org/model",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hello"}
                ],
                "temperature": 0.5,
                "top_p": 0.25,
                "max_tokens": 256,
                "stream": true
            })
        );
    }

    #[test]
    fn parses_deltas_and_stop() {
        let c: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#)
                .unwrap();
        assert_eq!(c.content(), Some("Hi"));
        assert!(!c.is_stop());

        let c: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(c.content(), None);
        assert!(c.is_stop());
    }

    #[test]
    fn extracts_in_band_errors() {
        let v = serde_json::json!({"error": {"message": "model overloaded"}});
        assert_eq!(api_error_message(&v).as_deref(), Some("model overloaded"));
        assert_eq!(api_error_message(&serde_json::json!({"choices": []})), None);
    }
}
