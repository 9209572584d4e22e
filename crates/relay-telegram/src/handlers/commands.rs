use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use tokio::time::Instant;
use tracing::{info, warn};

use relay_core::{
    completion::{stats::ApiStatsSnapshot, CompletionClient},
    config::Config,
    domain::{ChatId, ConversationTurn, Role, UserId},
    formatting::{escape_html, format_duration, truncate_with_ellipsis},
    history::{GlobalHistoryStats, UserStats},
    messaging::types::{InlineButton, InlineKeyboard},
    security::{GlobalRateStats, UserRateStats},
};
use relay_hf::HealthReport;

use crate::router::AppState;

pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");
const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// `1234567` -> `1,234,567`.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

pub(crate) fn start_keyboard() -> InlineKeyboard {
    InlineKeyboard::single_row(vec![
        InlineButton::new("🔄 Reset Chat", "reset_chat"),
        InlineButton::new("ℹ️ Info Bot", "bot_info"),
    ])
}

fn welcome_html(cfg: &Config, first_name: &str) -> String {
    format!(
        "👋 <b>Hey, {name}!</b>\n\n\
I'm <b>{bot}</b>, an AI assistant ready to help.\n\
Ask me anything, just type it.\n\n\
{RULE}\n\
🔹 <code>/reset</code> - Clear memory, start fresh\n\
🔹 <code>/help</code> - Show all commands\n\
🔹 <code>/info</code> - About this bot\n\
🔹 <code>/mydata</code> - Your conversation stats\n\
{RULE}\n\n\
Go ahead and type your message 👇",
        name = escape_html(first_name),
        bot = escape_html(&cfg.bot_name),
    )
}

fn help_html(cfg: &Config, is_admin: bool) -> String {
    let mut body = String::from(
        "📖 <b>Commands</b>\n\n\
🔹 <code>/start</code> - Restart and show the welcome\n\
🔹 <code>/reset</code> - Clear conversation history\n\
🔹 <code>/help</code> - Show this help\n\
🔹 <code>/info</code> - Bot information\n\
🔹 <code>/mydata</code> - Your conversation stats\n\
🔹 <code>/ping</code> - Check the bot is alive\n",
    );
    if is_admin {
        body.push_str(
            "\n🔐 <b>Admin Commands</b>\n\
🔸 <code>/stats</code> - Global bot statistics\n\
🔸 <code>/health</code> - System health check\n",
        );
    }
    body.push_str(&format!(
        "\n{RULE}\n\
💡 <b>Tip:</b> just type a message to chat!\n\
⚡ Rate limit: {limit} messages per {window}\n\
📝 Max input: {max_input} characters",
        limit = cfg.rate_limit_requests,
        window = format_duration(cfg.rate_limit_window),
        max_input = format_number(cfg.max_input_chars as u64),
    ));
    body
}

pub(crate) fn info_html(cfg: &Config, uptime: Duration) -> String {
    format!(
        "🤖 <b>{bot}</b>\n\n\
{RULE}\n\
📦 <b>Version:</b> <code>{VERSION}</code>\n\
🧠 <b>Model:</b> <code>{model}</code>\n\
🌡️ <b>Temperature:</b> <code>{temp}</code>\n\
🎯 <b>Top-P:</b> <code>{top_p}</code>\n\
📊 <b>Max Tokens:</b> <code>{max_tokens}</code>\n\
💬 <b>Context Window:</b> <code>{ctx} messages</code>\n\
⏱️ <b>Uptime:</b> <code>{uptime}</code>\n\
{RULE}",
        bot = escape_html(&cfg.bot_name),
        model = escape_html(cfg.model_short()),
        temp = cfg.temperature,
        top_p = cfg.top_p,
        max_tokens = format_number(cfg.max_new_tokens as u64),
        ctx = cfg.max_history_messages,
        uptime = format_duration(uptime),
    )
}

pub(crate) fn short_info_html(cfg: &Config, uptime: Duration) -> String {
    format!(
        "🤖 <b>{bot}</b> v{VERSION}\n\n\
🧠 Model: <code>{model}</code>\n\
🌡️ Temp: <code>{temp}</code> | Top-P: <code>{top_p}</code>\n\
⏱️ Uptime: <code>{uptime}</code>",
        bot = escape_html(&cfg.bot_name),
        model = escape_html(cfg.model_short()),
        temp = cfg.temperature,
        top_p = cfg.top_p,
        uptime = format_duration(uptime),
    )
}

pub(crate) const RESET_HTML: &str =
    "🧹 <b>Chat reset!</b>\n\nConversation memory cleared. Fresh start! 🔄\nGo ahead and type a new message.";

fn mydata_html(
    first_name: &str,
    stats: Option<&UserStats>,
    recent: &[ConversationTurn],
    context_max: usize,
    rate: &UserRateStats,
    rate_limit: u32,
) -> String {
    let default = UserStats::default();
    let stats = stats.unwrap_or(&default);
    let session_user = recent.iter().filter(|t| t.role == Role::User).count();
    let session_bot = recent.iter().filter(|t| t.role == Role::Assistant).count();
    let cooldown = if rate.cooldown_secs > 0 {
        format!("\n⏳ Next slot in      : <code>{}s</code>", rate.cooldown_secs)
    } else {
        String::new()
    };
    format!(
        "📊 <b>Your data, {name}</b>\n\n\
{RULE}\n\
💬 Total messages     : <code>{total}</code>\n\
📨 This session (you) : <code>{session_user}</code>\n\
🤖 This session (bot) : <code>{session_bot}</code>\n\
📅 First chat         : <code>{first}</code>\n\
🕐 Last active        : <code>{last}</code>\n\
🔄 Resets             : <code>{resets}</code>\n\
{RULE}\n\
🗂️ Context window     : <code>{context_len}/{context_max}</code>\n\
⚡ Messages left      : <code>{remaining}/{rate_limit}</code>{cooldown}",
        name = escape_html(first_name),
        total = format_number(stats.message_count),
        first = format_timestamp(stats.first_seen),
        last = format_timestamp(stats.last_active),
        resets = stats.reset_count,
        context_len = recent.len(),
        remaining = rate.remaining,
    )
}

fn stats_html(
    cfg: &Config,
    uptime: Duration,
    history: &GlobalHistoryStats,
    limiter: &GlobalRateStats,
    api: &ApiStatsSnapshot,
) -> String {
    let mut lines = vec![
        "📊 <b>Global Bot Statistics</b>\n".to_string(),
        RULE.to_string(),
        format!("👥 Total Users    : <code>{}</code>", format_number(history.total_users as u64)),
        format!("💬 Total Messages : <code>{}</code>", format_number(history.total_messages)),
        format!("📈 Active Today   : <code>{}</code>", format_number(history.active_today as u64)),
        format!("🗄️ History Turns  : <code>{}</code>", format_number(history.history_entries as u64)),
        format!("⏱️ Uptime         : <code>{}</code>", format_duration(uptime)),
        format!("🧠 Model          : <code>{}</code>", escape_html(cfg.model_short())),
        format!("🌡️ Temperature    : <code>{}</code>", cfg.temperature),
        RULE.to_string(),
    ];

    if !history.top_users.is_empty() {
        lines.push("🏆 <b>Top users</b>".to_string());
        for (i, (user, count)) in history.top_users.iter().enumerate() {
            lines.push(format!("{}. <code>{}</code>: {} msgs", i + 1, user, format_number(*count)));
        }
        lines.push(RULE.to_string());
    }

    lines.push(format!(
        "🛡️ Rate limiter: {} tracked | {} active | {} allowed | {} blocked ({:.1}%)",
        limiter.tracked_users,
        limiter.active_in_window,
        limiter.global_allowed,
        limiter.global_blocked,
        limiter.block_rate,
    ));
    lines.push(escape_html(&api.summary()));
    lines.join("\n")
}

fn health_html(cfg: &Config, uptime: Duration, report: &HealthReport) -> String {
    let status = match (report.status, report.error.as_deref()) {
        (Some(200), _) => "✅ Online".to_string(),
        (Some(code), _) => format!("⚠️ Status {code}"),
        (None, Some(err)) => format!("❌ Error: {}", escape_html(&truncate_with_ellipsis(err, 50))),
        (None, None) => "❌ Unreachable".to_string(),
    };
    let latency = if report.status.is_some() {
        format!("{}ms", report.latency.as_millis())
    } else {
        "N/A".to_string()
    };
    format!(
        "🏥 <b>System Health Check</b>\n\n\
{RULE}\n\
🤖 Bot Status     : ✅ Running\n\
⏱️ Uptime          : <code>{uptime}</code>\n\
🧠 HF API Status  : {status}\n\
📡 HF Latency     : <code>{latency}</code>\n\
📦 Version        : <code>{VERSION}</code>\n\
🔧 Model          : <code>{model}</code>\n\
{RULE}",
        uptime = format_duration(uptime),
        model = escape_html(cfg.model_short()),
    )
}

async fn reply(state: &AppState, chat_id: ChatId, html: &str) {
    if let Err(e) = state.messenger.send_html(chat_id, html).await {
        warn!(chat_id = chat_id.0, error = %e, "command reply failed");
    }
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let first_name = user.first_name.clone();
    let chat_id = ChatId(msg.chat.id.0);
    let is_admin = state.cfg.is_admin(user_id.0);

    let (cmd, _arg) = parse_command(text);

    match cmd.as_str() {
        "start" => {
            if let Err(e) = state.history.clear(user_id).await {
                warn!(%user_id, error = %e, "history clear failed");
            }
            let body = welcome_html(&state.cfg, &first_name);
            if let Err(e) = state
                .messenger
                .send_inline_keyboard(chat_id, &body, start_keyboard())
                .await
            {
                warn!(%user_id, error = %e, "welcome failed");
            }
            info!(%user_id, "user started");
        }

        "help" => reply(&state, chat_id, &help_html(&state.cfg, is_admin)).await,

        "info" => reply(&state, chat_id, &info_html(&state.cfg, state.uptime())).await,

        "ping" => {
            let started = Instant::now();
            match state.messenger.send_html(chat_id, "🏓 Pong!").await {
                Ok(sent) => {
                    let latency = started.elapsed();
                    let body = format!(
                        "🏓 <b>Pong!</b>\n⚡ Latency: <code>{}ms</code>\n⏱️ Uptime: <code>{}</code>",
                        latency.as_millis(),
                        format_duration(state.uptime())
                    );
                    if let Err(e) = state.messenger.edit_html(sent, &body).await {
                        warn!(%user_id, error = %e, "ping edit failed");
                    }
                }
                Err(e) => warn!(%user_id, error = %e, "ping failed"),
            }
        }

        "reset" => {
            match state.history.clear(user_id).await {
                Ok(removed) => info!(%user_id, removed, "history reset"),
                Err(e) => warn!(%user_id, error = %e, "history clear failed"),
            }
            reply(&state, chat_id, RESET_HTML).await;
        }

        "mydata" => {
            let limit = state.cfg.max_history_messages;
            let stats = state.history.user_stats(user_id).await.ok().flatten();
            let recent = state
                .history
                .fetch_recent(user_id, limit)
                .await
                .unwrap_or_default();
            let body = mydata_html(
                &first_name,
                stats.as_ref(),
                &recent,
                limit,
                &state.limiter.user_stats(user_id),
                state.cfg.rate_limit_requests,
            );
            reply(&state, chat_id, &body).await;
        }

        "stats" => {
            if !is_admin {
                warn!(%user_id, "unauthorized /stats attempt");
                reply(&state, chat_id, "🚫 You don't have access to this command.").await;
                return Ok(());
            }
            let history = match state.history.global_stats().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "global stats failed");
                    GlobalHistoryStats::default()
                }
            };
            let body = stats_html(
                &state.cfg,
                state.uptime(),
                &history,
                &state.limiter.global_stats(),
                &state.completion.stats(),
            );
            reply(&state, chat_id, &body).await;
        }

        "health" => {
            if !is_admin {
                reply(&state, chat_id, "🚫 Admin only.").await;
                return Ok(());
            }
            let report = state.completion.health_check().await;
            reply(&state, chat_id, &health_html(&state.cfg, state.uptime(), &report)).await;
        }

        _ => {
            reply(
                &state,
                chat_id,
                "❓ Unknown command. Use /help to see what I can do.",
            )
            .await;
        }
    }

    Ok(())
}
