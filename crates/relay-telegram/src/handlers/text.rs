use std::sync::Arc;

use teloxide::prelude::*;
use tracing::debug;

use relay_core::{
    domain::{ChatId, UserId},
    messaging::types::IncomingText,
};

use crate::router::AppState;

pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text().map(|s| s.to_string()) else {
        return Ok(());
    };

    let incoming = IncomingText {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
        text,
    };

    // The dispatcher runs one chat's updates in order; spawning lets
    // messages from the same chat proceed concurrently.
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let user_id = incoming.user_id;
        let outcome = orchestrator.handle(incoming).await;
        debug!(%user_id, ?outcome, "message handled");
    });

    Ok(())
}
