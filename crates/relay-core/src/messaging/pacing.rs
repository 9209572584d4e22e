//! Outbound pacing: minimum spacing between platform calls, overall and per chat.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::{
    config::Config,
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard},
    },
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacingConfig {
    /// Gap between any two outbound calls.
    pub min_gap: Duration,
    /// Gap between calls into one chat. Streaming edits dominate this.
    pub chat_gap: Duration,
}

impl PacingConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            min_gap: cfg.outbound_min_gap,
            chat_gap: cfg.outbound_chat_gap,
        }
    }
}

#[derive(Debug)]
struct Slots {
    next_any: Instant,
    next_in_chat: HashMap<ChatId, Instant>,
}

/// Books send slots. Shared between the paced messenger and housekeeping,
/// which drops chats whose next slot is already free.
#[derive(Debug)]
pub struct OutboundPacer {
    cfg: PacingConfig,
    slots: Mutex<Slots>,
}

impl OutboundPacer {
    pub fn new(cfg: PacingConfig) -> Self {
        Self {
            cfg,
            slots: Mutex::new(Slots {
                next_any: Instant::now(),
                next_in_chat: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Book the next free slot and return how long to wait for it. `None`
    /// books only the global slot.
    pub fn reserve_at(&self, chat: Option<ChatId>, now: Instant) -> Duration {
        let mut slots = self.lock();

        let any_start = slots.next_any.max(now);
        slots.next_any = any_start + self.cfg.min_gap;

        let start = match chat {
            Some(chat) => {
                let chat_start = slots
                    .next_in_chat
                    .get(&chat)
                    .map_or(now, |&next| next.max(now));
                slots.next_in_chat.insert(chat, chat_start + self.cfg.chat_gap);
                any_start.max(chat_start)
            }
            None => any_start,
        };
        start.saturating_duration_since(now)
    }

    async fn wait_turn(&self, chat: Option<ChatId>) {
        let wait = self.reserve_at(chat, Instant::now());
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    pub fn tracked_chats(&self) -> usize {
        self.lock().next_in_chat.len()
    }

    /// Forget chats with no pending spacing; a forgotten chat starts fresh.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let mut slots = self.lock();
        let before = slots.next_in_chat.len();
        slots.next_in_chat.retain(|_, next| *next > now);
        let removed = before - slots.next_in_chat.len();
        if removed > 0 {
            debug!(removed, "outbound pacer cleanup");
        }
        removed
    }
}

/// `MessagingPort` decorator that waits for a pacer slot before each call.
///
/// Lowers the odds of platform flood control during edit-heavy streaming
/// but cannot rule it out; edits still report `RetryAfter`.
pub struct PacedMessenger {
    inner: Arc<dyn MessagingPort>,
    pacer: Arc<OutboundPacer>,
}

impl PacedMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, pacer: Arc<OutboundPacer>) -> Self {
        Self { inner, pacer }
    }
}

#[async_trait]
impl MessagingPort for PacedMessenger {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.pacer.wait_turn(Some(chat_id)).await;
        self.inner.send_text(chat_id, text).await
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.pacer.wait_turn(Some(msg.chat_id)).await;
        self.inner.edit_text(msg, text).await
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.pacer.wait_turn(Some(chat_id)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.pacer.wait_turn(Some(msg.chat_id)).await;
        self.inner.edit_html(msg, html).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.pacer.wait_turn(Some(chat_id)).await;
        self.inner.send_chat_action(chat_id, action).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.pacer.wait_turn(Some(chat_id)).await;
        self.inner.send_inline_keyboard(chat_id, html, keyboard).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // Callback answers carry no chat.
        self.pacer.wait_turn(None).await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
