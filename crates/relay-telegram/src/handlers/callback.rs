use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{debug, info, warn};

use relay_core::domain::{ChatId, MessageId, MessageRef, UserId};

use crate::handlers::commands::{short_info_html, RESET_HTML};
use crate::router::AppState;

/// Inline buttons attached to the welcome message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ButtonAction {
    ResetChat,
    BotInfo,
}

impl ButtonAction {
    fn parse(data: &str) -> Option<Self> {
        match data {
            "reset_chat" => Some(Self::ResetChat),
            "bot_info" => Some(Self::BotInfo),
            _ => None,
        }
    }
}

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = UserId(q.from.id.0 as i64);
    let target = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });
    let action = q.data.as_deref().and_then(ButtonAction::parse);

    // Always answer so the client stops showing the spinner.
    if let Err(e) = state.messenger.answer_callback_query(&q.id, None).await {
        debug!(error = %e, "answer_callback_query failed");
    }

    let (Some(target), Some(action)) = (target, action) else {
        debug!(%user_id, data = ?q.data, "ignoring callback");
        return Ok(());
    };

    let body = match action {
        ButtonAction::ResetChat => {
            match state.history.clear(user_id).await {
                Ok(removed) => info!(%user_id, removed, "history reset via button"),
                Err(e) => warn!(%user_id, error = %e, "history clear failed"),
            }
            RESET_HTML.to_string()
        }
        ButtonAction::BotInfo => short_info_html(&state.cfg, state.uptime()),
    };

    if let Err(e) = state.messenger.edit_html(target, &body).await {
        warn!(%user_id, error = %e, "callback edit failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_buttons() {
        assert_eq!(ButtonAction::parse("reset_chat"), Some(ButtonAction::ResetChat));
        assert_eq!(ButtonAction::parse("bot_info"), Some(ButtonAction::BotInfo));
        assert_eq!(ButtonAction::parse("reset"), None);
        assert_eq!(ButtonAction::parse("Reset_Chat"), None);
        assert_eq!(ButtonAction::parse(""), None);
    }
}
