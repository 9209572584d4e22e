use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use relay_core::{
    config::Config,
    conversation::ConversationOrchestrator,
    history::HistoryStore,
    messaging::{
        port::MessagingPort,
        pacing::{OutboundPacer, PacedMessenger},
    },
    security::RateLimiter,
};
use relay_hf::HfClient;

use crate::handlers;
use crate::TelegramMessenger;

/// Long-lived collaborators built by the binary and shared with handlers.
pub struct Services {
    pub limiter: Arc<RateLimiter>,
    pub history: Arc<dyn HistoryStore>,
    pub completion: Arc<HfClient>,
    /// Shared with maintenance, which evicts idle chat slots.
    pub pacer: Arc<OutboundPacer>,
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub messenger: Arc<dyn MessagingPort>,
    pub limiter: Arc<RateLimiter>,
    pub history: Arc<dyn HistoryStore>,
    pub completion: Arc<HfClient>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn uptime(&self) -> std::time::Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

/// Poll Telegram until Ctrl-C. Returns once the dispatcher has shut down.
pub async fn run_polling(cfg: Arc<Config>, services: Services) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot connected"),
        Err(e) => warn!(error = %cfg.redact(&e.to_string()), "get_me failed"),
    }
    info!(
        model = %cfg.hf_model,
        admins = cfg.admin_ids.len(),
        rate_limit = cfg.rate_limit_requests,
        window_secs = cfg.rate_limit_window.as_secs(),
        serialize_per_user = cfg.serialize_per_user,
        "starting polling"
    );

    // Streaming edits are paced globally and per chat to stay clear of
    // Telegram flood control; the adapter still reports RetryAfter on edits.
    let messenger: Arc<dyn MessagingPort> = Arc::new(PacedMessenger::new(
        Arc::new(TelegramMessenger::new(bot.clone())),
        services.pacer.clone(),
    ));

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        &cfg,
        services.limiter.clone(),
        services.history.clone(),
        services.completion.clone(),
        messenger.clone(),
    ));

    let state = Arc::new(AppState {
        cfg,
        orchestrator,
        messenger,
        limiter: services.limiter,
        history: services.history,
        completion: services.completion,
        started_at: Utc::now(),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped");
    Ok(())
}
