use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    completion::{retry::RetryPolicy, types::SamplingParams},
    errors::Error,
    Result,
};

pub const DEFAULT_MODEL: &str = "meta-llama/Meta-Llama-3-8B-Instruct";
pub const DEFAULT_API_URL: &str = "https://router.huggingface.co/v1/chat/completions";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an advanced, intelligent AI assistant.
Be helpful, professional, and natural in your tone, similar to human conversation.
Provide strong reasoning and concise answers, but be ready to explain in depth if asked.
Do not mention which model or hosting provider you run on. Just act as a helpful AI.
Always respond in the same language the user uses.";

/// Typed configuration for the relay.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub hf_token: String,
    pub hf_model: String,
    pub hf_api_url: String,
    pub admin_ids: Vec<i64>,
    pub bot_name: String,
    pub system_prompt: String,

    // Input gate
    pub max_input_chars: usize,
    pub max_repeating_chars: usize,
    pub max_repeating_lines: usize,

    // Rate limiting
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_stale_after: Duration,

    // Model params
    pub temperature: f32,
    pub top_p: f32,
    pub max_new_tokens: u32,

    // Completion call
    pub request_timeout: Duration,
    /// Per-attempt bound on waiting for response headers; unset means
    /// `request_timeout`.
    pub attempt_timeout: Option<Duration>,
    pub retry_attempts: u32,
    pub retry_min_backoff: Duration,
    pub retry_max_backoff: Duration,

    // Conversation
    pub max_history_messages: usize,
    pub history_ttl: Duration,
    pub history_file: Option<PathBuf>,
    pub serialize_per_user: bool,

    // Streaming / Telegram limits
    pub stream_edit_interval: Duration,
    pub typing_cursor: String,
    pub telegram_message_limit: usize,
    pub telegram_safe_limit: usize,

    // Outbound pacing
    pub outbound_min_gap: Duration,
    pub outbound_chat_gap: Duration,

    // Housekeeping
    pub maintenance_interval: Duration,
}

impl Default for Config {
    /// Defaults with empty secrets; `load()` requires them to be set.
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            hf_token: String::new(),
            hf_model: DEFAULT_MODEL.to_string(),
            hf_api_url: DEFAULT_API_URL.to_string(),
            admin_ids: Vec::new(),
            bot_name: "Relay".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_input_chars: 2000,
            max_repeating_chars: 20,
            max_repeating_lines: 5,
            rate_limit_requests: 5,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_stale_after: Duration::from_secs(3600),
            temperature: 0.7,
            top_p: 0.9,
            max_new_tokens: 1024,
            request_timeout: Duration::from_secs(90),
            attempt_timeout: None,
            retry_attempts: 3,
            retry_min_backoff: Duration::from_secs(2),
            retry_max_backoff: Duration::from_secs(10),
            max_history_messages: 10,
            history_ttl: Duration::from_secs(24 * 3600),
            history_file: None,
            serialize_per_user: false,
            stream_edit_interval: Duration::from_millis(800),
            typing_cursor: "▌".to_string(),
            telegram_message_limit: 4096,
            telegram_safe_limit: 4000,
            outbound_min_gap: Duration::from_millis(40),
            outbound_chat_gap: Duration::from_millis(300),
            maintenance_interval: Duration::from_secs(600),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let hf_token = get("HF_TOKEN").unwrap_or_default();
        if hf_token.trim().is_empty() {
            return Err(Error::Config(
                "HF_TOKEN environment variable is required".to_string(),
            ));
        }

        let parse_u64 = |k: &str| get(k).and_then(|s| s.trim().parse::<u64>().ok());
        let parse_usize = |k: &str| get(k).and_then(|s| s.trim().parse::<usize>().ok());
        let parse_f32 = |k: &str| get(k).and_then(|s| s.trim().parse::<f32>().ok());

        let retry_min_backoff = parse_u64("RETRY_MIN_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(d.retry_min_backoff);
        let retry_max_backoff = parse_u64("RETRY_MAX_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(d.retry_max_backoff)
            .max(retry_min_backoff);

        Ok(Self {
            telegram_bot_token,
            hf_token,
            hf_model: get("HF_MODEL").and_then(non_empty).unwrap_or(d.hf_model),
            hf_api_url: get("HF_API_URL").and_then(non_empty).unwrap_or(d.hf_api_url),
            admin_ids: parse_csv_i64(get("ADMIN_IDS")),
            bot_name: get("BOT_NAME").and_then(non_empty).unwrap_or(d.bot_name),
            system_prompt: get("SYSTEM_PROMPT")
                .and_then(non_empty)
                .unwrap_or(d.system_prompt),
            max_input_chars: parse_usize("MAX_INPUT_CHARS").unwrap_or(d.max_input_chars),
            max_repeating_chars: parse_usize("MAX_REPEATING_CHARS")
                .unwrap_or(d.max_repeating_chars)
                .max(1),
            max_repeating_lines: parse_usize("MAX_REPEATING_LINES")
                .unwrap_or(d.max_repeating_lines),
            rate_limit_requests: get("RATE_LIMIT_REQUESTS")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(d.rate_limit_requests),
            rate_limit_window: parse_u64("RATE_LIMIT_WINDOW")
                .map(Duration::from_secs)
                .unwrap_or(d.rate_limit_window),
            rate_limit_stale_after: parse_u64("RATE_LIMIT_STALE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.rate_limit_stale_after),
            temperature: parse_f32("TEMPERATURE").unwrap_or(d.temperature),
            top_p: parse_f32("TOP_P").unwrap_or(d.top_p),
            max_new_tokens: get("MAX_NEW_TOKENS")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(d.max_new_tokens),
            request_timeout: parse_u64("REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.request_timeout),
            attempt_timeout: parse_u64("ATTEMPT_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            retry_attempts: get("RETRY_ATTEMPTS")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(d.retry_attempts)
                .max(1),
            retry_min_backoff,
            retry_max_backoff,
            max_history_messages: parse_usize("MAX_HISTORY_MESSAGES")
                .unwrap_or(d.max_history_messages),
            history_ttl: parse_u64("HISTORY_TTL_HOURS")
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(d.history_ttl),
            history_file: get("HISTORY_FILE").and_then(non_empty).map(PathBuf::from),
            serialize_per_user: get("SERIALIZE_PER_USER")
                .map(|s| parse_bool(&s))
                .unwrap_or(d.serialize_per_user),
            stream_edit_interval: parse_u64("STREAM_EDIT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.stream_edit_interval),
            typing_cursor: get("TYPING_CURSOR")
                .and_then(non_empty)
                .unwrap_or(d.typing_cursor),
            telegram_message_limit: parse_usize("TELEGRAM_MESSAGE_LIMIT")
                .unwrap_or(d.telegram_message_limit),
            telegram_safe_limit: parse_usize("TELEGRAM_SAFE_LIMIT")
                .unwrap_or(d.telegram_safe_limit),
            outbound_min_gap: parse_u64("OUTBOUND_MIN_GAP_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.outbound_min_gap),
            outbound_chat_gap: parse_u64("OUTBOUND_CHAT_GAP_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.outbound_chat_gap),
            maintenance_interval: parse_u64("MAINTENANCE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.maintenance_interval),
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_new_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            min_backoff: self.retry_min_backoff,
            max_backoff: self.retry_max_backoff,
        }
    }

    /// Short model name for display (`org/model` -> `model`).
    pub fn model_short(&self) -> &str {
        self.hf_model.rsplit('/').next().unwrap_or(&self.hf_model)
    }

    /// Mask secrets before a string reaches the logs.
    pub fn redact(&self, s: &str) -> String {
        let mut out = s.to_string();
        if !self.telegram_bot_token.is_empty() {
            out = out.replace(&self.telegram_bot_token, "***BOT_TOKEN***");
        }
        if !self.hf_token.is_empty() {
            out = out.replace(&self.hf_token, "***HF_TOKEN***");
        }
        out
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
