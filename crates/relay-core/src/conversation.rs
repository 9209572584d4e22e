//! Per-message control flow: gate, limit, fetch context, stream, persist.

use std::{collections::HashMap, fmt, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::{
    completion::{
        CompletionClient, CompletionErrorKind, CompletionRequest, SamplingParams,
    },
    config::Config,
    domain::{ChatId, ConversationTurn, MessageRef, Role, UserId},
    formatting::truncate_with_ellipsis,
    history::HistoryStore,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, IncomingText},
    },
    security::RateLimiter,
    streaming::{PresenterConfig, StreamPresenter},
    validation::{InputGate, ValidationRejection},
    Error,
};

pub const PLACEHOLDER_TEXT: &str = "💭 Thinking...";
pub const COMPLETION_FAILED_TEXT: &str =
    "⚠️ The AI is having trouble right now. Please try again in a moment.";
pub const COMPLETION_TIMEOUT_TEXT: &str =
    "⌛ The model is taking too long to respond. Please try again shortly.";
pub const SYSTEM_ERROR_TEXT: &str = "💥 Something went wrong on our side. Please try again later.";

pub fn rate_limited_text(cooldown_secs: u64) -> String {
    format!("⏳ Slow down! You're sending messages too fast. Try again in {cooldown_secs} seconds.")
}

/// Pipeline stage, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Gating,
    Limiting,
    Fetching,
    Streaming,
    Persisting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Gating => "gating",
            Stage::Limiting => "limiting",
            Stage::Fetching => "fetching",
            Stage::Streaming => "streaming",
            Stage::Persisting => "persisting",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Last stage a run entered; read when the run panics.
struct StageMark(std::sync::Mutex<Stage>);

impl StageMark {
    fn new() -> Self {
        Self(std::sync::Mutex::new(Stage::Gating))
    }

    fn enter(&self, stage: Stage) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = stage;
    }

    fn get(&self) -> Stage {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Completion(CompletionErrorKind),
    Presentation,
    Unexpected,
}

/// Terminal state of one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed { chars: usize, chunks: usize },
    Rejected(ValidationRejection),
    RateLimited { cooldown_secs: u64 },
    Failed { stage: Stage, kind: FailureKind },
}

/// Per-user async mutexes, created on first use.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Forget the user's mutex once nobody holds or waits on it.
    pub async fn release_idle(&self, user_id: UserId) -> bool {
        let mut map = self.inner.lock().await;
        match map.get(&user_id) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                map.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

pub struct ConversationOrchestrator {
    gate: InputGate,
    limiter: Arc<RateLimiter>,
    history: Arc<dyn HistoryStore>,
    completion: Arc<dyn CompletionClient>,
    messenger: Arc<dyn MessagingPort>,
    presenter: PresenterConfig,
    system_prompt: String,
    sampling: SamplingParams,
    context_turns: usize,
    user_locks: Option<UserLocks>,
}

impl ConversationOrchestrator {
    pub fn new(
        cfg: &Config,
        limiter: Arc<RateLimiter>,
        history: Arc<dyn HistoryStore>,
        completion: Arc<dyn CompletionClient>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            gate: InputGate::from_config(cfg),
            limiter,
            history,
            completion,
            messenger,
            presenter: PresenterConfig::from_config(cfg),
            system_prompt: cfg.system_prompt.clone(),
            sampling: cfg.sampling(),
            context_turns: cfg.max_history_messages,
            user_locks: cfg.serialize_per_user.then(UserLocks::default),
        }
    }

    pub fn user_locks(&self) -> Option<&UserLocks> {
        self.user_locks.as_ref()
    }

    /// Run the pipeline for one incoming message. Never fails and never
    /// panics outward; every failure is reported to the user and logged.
    pub async fn handle(&self, msg: IncomingText) -> Outcome {
        let chat_id = msg.chat_id;
        let user_id = msg.user_id;

        let stage = StageMark::new();
        let result = AssertUnwindSafe(self.run(msg, &stage)).catch_unwind().await;
        if let Some(locks) = &self.user_locks {
            locks.release_idle(user_id).await;
        }

        match result {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let stage = stage.get();
                error!(%user_id, %stage, reason = %reason, "pipeline panicked");
                self.notify(chat_id, SYSTEM_ERROR_TEXT).await;
                Outcome::Failed {
                    stage,
                    kind: FailureKind::Unexpected,
                }
            }
        }
    }

    async fn run(&self, msg: IncomingText, stage: &StageMark) -> Outcome {
        let IncomingText {
            chat_id,
            user_id,
            username,
            text,
        } = msg;
        let who = username.as_deref().unwrap_or("unknown");

        stage.enter(Stage::Gating);
        let clean = match self.gate.validate(&text) {
            Ok(clean) => clean,
            Err(rejection) => {
                info!(%user_id, user = who, reason = ?rejection, "input rejected");
                self.notify(chat_id, &format!("⚠️ {rejection}")).await;
                return Outcome::Rejected(rejection);
            }
        };

        stage.enter(Stage::Limiting);
        if !self.limiter.is_allowed(user_id) {
            let cooldown_secs = self.limiter.cooldown_seconds(user_id);
            info!(%user_id, user = who, cooldown_secs, "rate limited");
            self.notify(chat_id, &rate_limited_text(cooldown_secs)).await;
            return Outcome::RateLimited { cooldown_secs };
        }

        let _serial = match &self.user_locks {
            Some(locks) => Some(locks.lock_user(user_id).await),
            None => None,
        };

        stage.enter(Stage::Fetching);
        if let Err(e) = self
            .messenger
            .send_chat_action(chat_id, ChatAction::Typing)
            .await
        {
            debug!(%user_id, error = %e, "typing indicator failed");
        }

        let turns = match self.build_context(user_id, &clean).await {
            Ok(turns) => turns,
            Err(e) => {
                error!(%user_id, stage = %Stage::Fetching, error = %e, "history unavailable");
                self.notify(chat_id, SYSTEM_ERROR_TEXT).await;
                return Outcome::Failed {
                    stage: Stage::Fetching,
                    kind: FailureKind::Unexpected,
                };
            }
        };
        info!(
            %user_id,
            user = who,
            context_turns = turns.len(),
            preview = %truncate_with_ellipsis(&clean, 80),
            "message accepted"
        );

        stage.enter(Stage::Streaming);
        let placeholder = match self.messenger.send_text(chat_id, PLACEHOLDER_TEXT).await {
            Ok(m) => m,
            Err(e) => {
                error!(%user_id, stage = %Stage::Streaming, error = %e, "placeholder send failed");
                return Outcome::Failed {
                    stage: Stage::Streaming,
                    kind: FailureKind::Presentation,
                };
            }
        };

        let request = CompletionRequest {
            turns,
            sampling: self.sampling,
        };
        let presented = match self.completion.stream_completion(request).await {
            Ok(stream) => {
                StreamPresenter::new(self.messenger.as_ref(), &self.presenter)
                    .present(placeholder, stream)
                    .await
            }
            Err(e) => Err(Error::Completion(e)),
        };

        let response = match presented {
            Ok(r) => r,
            Err(e) => return self.fail_streaming(user_id, placeholder, e).await,
        };

        stage.enter(Stage::Persisting);
        if let Err(e) = self
            .history
            .append(user_id, Role::Assistant, &response.text)
            .await
        {
            error!(%user_id, stage = %Stage::Persisting, error = %e, "assistant turn not saved");
            self.notify(chat_id, SYSTEM_ERROR_TEXT).await;
            return Outcome::Failed {
                stage: Stage::Persisting,
                kind: FailureKind::Unexpected,
            };
        }

        stage.enter(Stage::Done);
        let chars = response.text.chars().count();
        info!(
            %user_id,
            user = who,
            chars,
            chunks = response.chunk_count,
            elapsed_ms = response.elapsed.as_millis() as u64,
            "response sent"
        );
        Outcome::Completed {
            chars,
            chunks: response.chunk_count,
        }
    }

    async fn build_context(
        &self,
        user_id: UserId,
        clean: &str,
    ) -> crate::Result<Vec<ConversationTurn>> {
        self.history.append(user_id, Role::User, clean).await?;
        let recent = self
            .history
            .fetch_recent(user_id, self.context_turns)
            .await?;

        let mut turns = Vec::with_capacity(recent.len() + 1);
        turns.push(ConversationTurn::system(self.system_prompt.clone()));
        turns.extend(recent);
        Ok(turns)
    }

    async fn fail_streaming(&self, user_id: UserId, placeholder: MessageRef, err: Error) -> Outcome {
        let (kind, text) = match &err {
            Error::Completion(e) => {
                error!(
                    %user_id,
                    kind = %e.kind,
                    status = e.status,
                    error = %e.message,
                    "generation failed"
                );
                let text = if e.kind == CompletionErrorKind::Timeout {
                    COMPLETION_TIMEOUT_TEXT
                } else {
                    COMPLETION_FAILED_TEXT
                };
                (FailureKind::Completion(e.kind), text)
            }
            Error::Presentation(reason) => {
                error!(%user_id, reason = %reason, "final render failed");
                (FailureKind::Presentation, SYSTEM_ERROR_TEXT)
            }
            other => {
                error!(%user_id, error = ?other, "unexpected streaming failure");
                (FailureKind::Unexpected, SYSTEM_ERROR_TEXT)
            }
        };

        if let Err(e) = self.messenger.edit_text(placeholder, text).await {
            warn!(%user_id, error = %e, "could not edit placeholder, sending instead");
            self.notify(placeholder.chat_id, text).await;
        }

        Outcome::Failed {
            stage: Stage::Streaming,
            kind,
        }
    }

    async fn notify(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            warn!(chat_id = chat_id.0, error = %e, "notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        completion::{CompletionError, StreamEvent},
        history::{GlobalHistoryStats, MemoryHistoryStore, UserStats},
        testing::{FakeMessenger, Op, ScriptedCompletion},
    };

    /// Memory store that panics when a turn with `panic_on` is appended.
    struct PanickingHistory {
        inner: MemoryHistoryStore,
        panic_on: Role,
    }

    #[async_trait]
    impl HistoryStore for PanickingHistory {
        async fn append(&self, user_id: UserId, role: Role, content: &str) -> crate::Result<()> {
            if role == self.panic_on {
                panic!("history exploded on {role:?}");
            }
            self.inner.append(user_id, role, content).await
        }

        async fn fetch_recent(
            &self,
            user_id: UserId,
            limit: usize,
        ) -> crate::Result<Vec<ConversationTurn>> {
            self.inner.fetch_recent(user_id, limit).await
        }

        async fn clear(&self, user_id: UserId) -> crate::Result<usize> {
            self.inner.clear(user_id).await
        }

        async fn user_stats(&self, user_id: UserId) -> crate::Result<Option<UserStats>> {
            self.inner.user_stats(user_id).await
        }

        async fn global_stats(&self) -> crate::Result<GlobalHistoryStats> {
            self.inner.global_stats().await
        }

        async fn purge_older_than(&self, age: Duration) -> crate::Result<usize> {
            self.inner.purge_older_than(age).await
        }
    }

    async fn panic_outcome(panic_on: Role) -> (Outcome, Arc<FakeMessenger>) {
        let cfg = test_config();
        let messenger = Arc::new(FakeMessenger::new());
        let orchestrator = ConversationOrchestrator::new(
            &cfg,
            Arc::new(RateLimiter::from_config(&cfg)),
            Arc::new(PanickingHistory {
                inner: MemoryHistoryStore::new(),
                panic_on,
            }),
            Arc::new(ScriptedCompletion::chunks(&["fine"])),
            messenger.clone(),
        );
        (orchestrator.handle(incoming(1, "hello")).await, messenger)
    }

    struct Harness {
        orchestrator: ConversationOrchestrator,
        messenger: Arc<FakeMessenger>,
        completion: Arc<ScriptedCompletion>,
        history: Arc<MemoryHistoryStore>,
    }

    fn test_config() -> Config {
        Config {
            telegram_bot_token: "bot".to_string(),
            hf_token: "hf".to_string(),
            system_prompt: "be nice".to_string(),
            admin_ids: vec![99],
            rate_limit_requests: 2,
            ..Config::default()
        }
    }

    fn harness(cfg: Config, completion: ScriptedCompletion) -> Harness {
        let messenger = Arc::new(FakeMessenger::new());
        let completion = Arc::new(completion);
        let history = Arc::new(MemoryHistoryStore::new());
        let orchestrator = ConversationOrchestrator::new(
            &cfg,
            Arc::new(RateLimiter::from_config(&cfg)),
            history.clone(),
            completion.clone(),
            messenger.clone(),
        );
        Harness {
            orchestrator,
            messenger,
            completion,
            history,
        }
    }

    fn incoming(user: i64, text: &str) -> IncomingText {
        IncomingText {
            chat_id: ChatId(user),
            user_id: UserId(user),
            username: Some("tester".to_string()),
            text: text.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hello_round_trip() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["Hi", " there"]));

        let outcome = h.orchestrator.handle(incoming(1, "hello")).await;
        assert_eq!(outcome, Outcome::Completed { chars: 8, chunks: 2 });

        let requests = h.completion.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].turns,
            vec![
                ConversationTurn::system("be nice"),
                ConversationTurn::user("hello"),
            ]
        );

        assert_eq!(h.messenger.sent_texts(), vec![PLACEHOLDER_TEXT]);
        assert_eq!(h.messenger.edits(), vec!["Hi there"]);

        assert_eq!(
            h.history.fetch_recent(UserId(1), 10).await.unwrap(),
            vec![
                ConversationTurn::user("hello"),
                ConversationTurn::assistant("Hi there"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn context_carries_previous_turns() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["ok"]));
        h.orchestrator.handle(incoming(1, "first")).await;
        h.orchestrator.handle(incoming(1, "second")).await;

        let requests = h.completion.requests();
        assert_eq!(
            requests[1].turns,
            vec![
                ConversationTurn::system("be nice"),
                ConversationTurn::user("first"),
                ConversationTurn::assistant("ok"),
                ConversationTurn::user("second"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_input_never_reaches_model() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["x"]));

        let outcome = h.orchestrator.handle(incoming(1, "   ")).await;
        assert_eq!(outcome, Outcome::Rejected(ValidationRejection::Empty));
        assert_eq!(h.completion.calls(), 0);
        assert!(h.messenger.sent_texts()[0].starts_with("⚠️"));
        assert!(h.history.user_stats(UserId(1)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_input_does_not_consume_rate_budget() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["x"]));
        for _ in 0..5 {
            h.orchestrator.handle(incoming(1, "")).await;
        }
        let outcome = h.orchestrator.handle(incoming(1, "real")).await;
        assert!(matches!(outcome, Outcome::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_reports_cooldown() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["x"]));
        h.orchestrator.handle(incoming(1, "a")).await;
        h.orchestrator.handle(incoming(1, "b")).await;

        let outcome = h.orchestrator.handle(incoming(1, "c")).await;
        let Outcome::RateLimited { cooldown_secs } = outcome else {
            panic!("expected rate limit, got {outcome:?}");
        };
        assert!(cooldown_secs >= 1);
        assert_eq!(h.completion.calls(), 2);
        assert_eq!(
            h.messenger.sent_texts().last().cloned(),
            Some(rate_limited_text(cooldown_secs))
        );

        // Admins bypass.
        for _ in 0..5 {
            let outcome = h.orchestrator.handle(incoming(99, "hi")).await;
            assert!(matches!(outcome, Outcome::Completed { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_failure_edits_placeholder_generically() {
        let h = harness(
            test_config(),
            ScriptedCompletion::failing(CompletionError::from_status(401)),
        );

        let outcome = h.orchestrator.handle(incoming(1, "hello")).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Streaming,
                kind: FailureKind::Completion(CompletionErrorKind::Unauthorized),
            }
        );
        assert_eq!(h.messenger.edits(), vec![COMPLETION_FAILED_TEXT]);

        // Only the user turn is stored.
        assert_eq!(h.history.fetch_recent(UserId(1), 10).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_gets_its_own_message() {
        let h = harness(
            test_config(),
            ScriptedCompletion::failing(CompletionError::timeout("deadline exceeded")),
        );
        h.orchestrator.handle(incoming(1, "hello")).await;
        assert_eq!(h.messenger.edits(), vec![COMPLETION_TIMEOUT_TEXT]);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_model_output_is_not_persisted() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["", " "]));

        let outcome = h.orchestrator.handle(incoming(1, "hello")).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Streaming,
                kind: FailureKind::Completion(CompletionErrorKind::EmptyResponse),
            }
        );
        assert_eq!(h.history.fetch_recent(UserId(1), 10).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn final_render_failure_falls_back_to_new_message() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["done"]));
        h.messenger
            .fail_next_edit(Error::External("message to edit not found".to_string()));

        let outcome = h.orchestrator.handle(incoming(1, "hello")).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Streaming,
                kind: FailureKind::Presentation,
            }
        );
        assert_eq!(
            h.messenger.edits(),
            vec![SYSTEM_ERROR_TEXT],
            "error text replaces the placeholder"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_error_is_reported() {
        let h = harness(
            test_config(),
            ScriptedCompletion::events(vec![
                StreamEvent::Chunk("par".to_string()),
                StreamEvent::Error(CompletionError::network("connection reset")),
            ]),
        );
        let outcome = h.orchestrator.handle(incoming(1, "hello")).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Streaming,
                kind: FailureKind::Completion(CompletionErrorKind::NetworkError),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_failure_stops_before_model_call() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["x"]));
        h.messenger.fail_sends();

        let outcome = h.orchestrator.handle(incoming(1, "hello")).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Streaming,
                kind: FailureKind::Presentation,
            }
        );
        assert_eq!(h.completion.calls(), 0);
        assert!(h
            .messenger
            .ops()
            .iter()
            .all(|op| matches!(op, Op::Action(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn panic_reports_the_stage_it_happened_in() {
        let (outcome, messenger) = panic_outcome(Role::User).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Fetching,
                kind: FailureKind::Unexpected,
            }
        );
        assert_eq!(messenger.sent_texts(), vec![SYSTEM_ERROR_TEXT]);

        let (outcome, messenger) = panic_outcome(Role::Assistant).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Persisting,
                kind: FailureKind::Unexpected,
            }
        );
        assert_eq!(messenger.edits(), vec!["fine"]);
        assert_eq!(
            messenger.sent_texts().last().map(String::as_str),
            Some(SYSTEM_ERROR_TEXT)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_typing_indicator_does_not_stop_the_reply() {
        let h = harness(test_config(), ScriptedCompletion::chunks(&["still here"]));
        h.messenger.fail_chat_actions();

        let outcome = h.orchestrator.handle(incoming(1, "hello")).await;
        assert!(matches!(outcome, Outcome::Completed { .. }));
        assert_eq!(h.messenger.edits(), vec!["still here"]);
        assert!(!h.messenger.ops().iter().any(|op| matches!(op, Op::Action(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn serialized_users_do_not_interleave() {
        let cfg = Config {
            serialize_per_user: true,
            rate_limit_requests: 10,
            ..test_config()
        };
        let h = harness(cfg, ScriptedCompletion::chunks(&["reply"]));

        let (a, b) = tokio::join!(
            h.orchestrator.handle(incoming(1, "one")),
            h.orchestrator.handle(incoming(1, "two")),
        );
        assert!(matches!(a, Outcome::Completed { .. }));
        assert!(matches!(b, Outcome::Completed { .. }));

        let roles: Vec<Role> = h
            .history
            .fetch_recent(UserId(1), 10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.role)
            .collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(h.orchestrator.user_locks().unwrap().tracked().await, 0);
    }

    #[tokio::test]
    async fn user_locks_serialize_holders() {
        let locks = Arc::new(UserLocks::default());
        let guard = locks.lock_user(UserId(1)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock_user(UserId(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        assert!(!locks.release_idle(UserId(1)).await);

        drop(guard);
        contender.await.unwrap();
        assert!(locks.release_idle(UserId(1)).await);
        assert_eq!(locks.tracked().await, 0);
    }
}
