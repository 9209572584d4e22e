//! In-process fakes of the ports, shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{atomic::AtomicUsize, atomic::Ordering, Mutex},
};

use async_trait::async_trait;
use futures::stream;

use crate::{
    completion::{
        stats::{ApiStats, ApiStatsSnapshot},
        ChunkStream, CompletionClient, CompletionError, CompletionRequest, StreamEvent,
    },
    domain::{ChatId, MessageId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard},
    },
    Error, Result,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    SendText(ChatId, String),
    EditText(MessageRef, String),
    SendHtml(ChatId, String),
    EditHtml(MessageRef, String),
    Action(ChatId),
    Keyboard(ChatId, String),
    Callback(String),
}

pub struct FakeMessenger {
    next_id: Mutex<i32>,
    ops: Mutex<Vec<Op>>,
    edit_failures: Mutex<VecDeque<Error>>,
    fail_sends: Mutex<bool>,
    fail_actions: Mutex<bool>,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(100),
            ops: Mutex::new(Vec::new()),
            edit_failures: Mutex::new(VecDeque::new()),
            fail_sends: Mutex::new(false),
            fail_actions: Mutex::new(false),
        }
    }

    /// Queue an error for the next `edit_text` call.
    pub fn fail_next_edit(&self, err: Error) {
        self.edit_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_sends(&self) {
        *self.fail_sends.lock().unwrap() = true;
    }

    pub fn fail_chat_actions(&self) {
        *self.fail_actions.lock().unwrap() = true;
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::SendText(_, t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::EditText(_, t) => Some(t),
                _ => None,
            })
            .collect()
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        let id = *guard;
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(id),
        }
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    fn check_send(&self) -> Result<()> {
        if *self.fail_sends.lock().unwrap() {
            return Err(Error::External("send failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.check_send()?;
        self.record(Op::SendText(chat_id, text.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        if let Some(err) = self.edit_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.record(Op::EditText(msg, text.to_string()));
        Ok(())
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.check_send()?;
        self.record(Op::SendHtml(chat_id, html.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.record(Op::EditHtml(msg, html.to_string()));
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: ChatId, _action: ChatAction) -> Result<()> {
        if *self.fail_actions.lock().unwrap() {
            return Err(Error::External("chat action failed".to_string()));
        }
        self.record(Op::Action(chat_id));
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        _keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.check_send()?;
        self.record(Op::Keyboard(chat_id, html.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn answer_callback_query(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.record(Op::Callback(callback_id.to_string()));
        Ok(())
    }
}

/// Completion client that replays a fixed script and records requests.
pub struct ScriptedCompletion {
    script: std::result::Result<Vec<StreamEvent>, CompletionError>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
    stats: ApiStats,
}

impl ScriptedCompletion {
    pub fn chunks(chunks: &[&str]) -> Self {
        let mut events: Vec<StreamEvent> = chunks
            .iter()
            .map(|c| StreamEvent::Chunk(c.to_string()))
            .collect();
        events.push(StreamEvent::End);
        Self::events(events)
    }

    pub fn events(events: Vec<StreamEvent>) -> Self {
        Self {
            script: Ok(events),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            stats: ApiStats::new(),
        }
    }

    pub fn failing(err: CompletionError) -> Self {
        Self {
            script: Err(err),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            stats: ApiStats::new(),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn stream_completion(
        &self,
        req: CompletionRequest,
    ) -> std::result::Result<ChunkStream, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req);
        match &self.script {
            Ok(events) => Ok(Box::pin(stream::iter(events.clone()))),
            Err(err) => Err(err.clone()),
        }
    }

    fn stats(&self) -> ApiStatsSnapshot {
        self.stats.snapshot()
    }
}
