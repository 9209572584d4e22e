//! Conversation history and per-user statistics.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    domain::{ConversationTurn, Role, UserId},
    Error, Result,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    /// User turns only.
    pub message_count: u64,
    pub total_chars_sent: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub reset_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalHistoryStats {
    pub total_users: usize,
    pub total_messages: u64,
    pub active_today: usize,
    pub history_entries: usize,
    pub total_chars: u64,
    /// Up to five users, highest message count first.
    pub top_users: Vec<(UserId, u64)>,
}

/// Storage contract the orchestrator and command handlers depend on.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, user_id: UserId, role: Role, content: &str) -> Result<()>;

    /// Most recent `limit` turns, oldest first.
    async fn fetch_recent(&self, user_id: UserId, limit: usize) -> Result<Vec<ConversationTurn>>;

    /// Drop a user's history. Returns the number of removed turns.
    async fn clear(&self, user_id: UserId) -> Result<usize>;

    async fn user_stats(&self, user_id: UserId) -> Result<Option<UserStats>>;

    async fn global_stats(&self) -> Result<GlobalHistoryStats>;

    /// Drop turns older than `age`. Returns the number of removed turns.
    async fn purge_older_than(&self, age: Duration) -> Result<usize>;

    /// Persist buffered state, if the store has a backing file.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredTurn {
    role: Role,
    content: String,
    at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct UserRecord {
    user_id: UserId,
    stats: UserStats,
    turns: Vec<StoredTurn>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    saved_at: Option<DateTime<Utc>>,
    users: Vec<UserRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    turns: HashMap<UserId, Vec<StoredTurn>>,
    stats: HashMap<UserId, UserStats>,
    dirty: bool,
}

/// In-process history store with an optional JSON snapshot file.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    inner: Mutex<Inner>,
    snapshot: Option<PathBuf>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it when present.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut inner = Inner::default();

        if let Some(file) = load_snapshot(&path).await? {
            let users = file.users.len();
            for rec in file.users {
                inner.turns.insert(rec.user_id, rec.turns);
                inner.stats.insert(rec.user_id, rec.stats);
            }
            info!(path = %path.display(), users, "history snapshot loaded");
        }

        Ok(Self {
            inner: Mutex::new(inner),
            snapshot: Some(path),
        })
    }

    pub async fn append_at(
        &self,
        user_id: UserId,
        role: Role,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.turns.entry(user_id).or_default().push(StoredTurn {
            role,
            content: content.to_string(),
            at,
        });

        if role == Role::User {
            let stats = inner.stats.entry(user_id).or_default();
            stats.message_count += 1;
            stats.total_chars_sent += content.chars().count() as u64;
            stats.first_seen.get_or_insert(at);
            stats.last_active = Some(at);
        }
        inner.dirty = true;
        Ok(())
    }

    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let mut removed = 0;
        for turns in inner.turns.values_mut() {
            let before = turns.len();
            turns.retain(|t| t.at >= cutoff);
            removed += before - turns.len();
        }
        inner.turns.retain(|_, turns| !turns.is_empty());
        if removed > 0 {
            inner.dirty = true;
            info!(removed, %cutoff, "purged old history");
        }
        Ok(removed)
    }

    pub async fn global_stats_at(&self, now: DateTime<Utc>) -> GlobalHistoryStats {
        let inner = self.inner.lock().await;
        let today = now.date_naive();

        let mut top_users: Vec<(UserId, u64)> = inner
            .stats
            .iter()
            .map(|(id, s)| (*id, s.message_count))
            .collect();
        top_users.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        top_users.truncate(5);

        GlobalHistoryStats {
            total_users: inner.stats.len(),
            total_messages: inner.stats.values().map(|s| s.message_count).sum(),
            active_today: inner
                .stats
                .values()
                .filter(|s| s.last_active.is_some_and(|t| t.date_naive() == today))
                .count(),
            history_entries: inner.turns.values().map(Vec::len).sum(),
            total_chars: inner.stats.values().map(|s| s.total_chars_sent).sum(),
            top_users,
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, user_id: UserId, role: Role, content: &str) -> Result<()> {
        self.append_at(user_id, role, content, Utc::now()).await
    }

    async fn fetch_recent(&self, user_id: UserId, limit: usize) -> Result<Vec<ConversationTurn>> {
        let inner = self.inner.lock().await;
        let Some(turns) = inner.turns.get(&user_id) else {
            return Ok(Vec::new());
        };
        let skip = turns.len().saturating_sub(limit);
        Ok(turns[skip..]
            .iter()
            .map(|t| ConversationTurn::new(t.role, t.content.clone()))
            .collect())
    }

    async fn clear(&self, user_id: UserId) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let removed = inner.turns.remove(&user_id).map(|t| t.len()).unwrap_or(0);
        let stats = inner.stats.entry(user_id).or_default();
        stats.reset_count += 1;
        inner.dirty = true;
        debug!(%user_id, removed, "history cleared");
        Ok(removed)
    }

    async fn user_stats(&self, user_id: UserId) -> Result<Option<UserStats>> {
        Ok(self.inner.lock().await.stats.get(&user_id).cloned())
    }

    async fn global_stats(&self) -> Result<GlobalHistoryStats> {
        Ok(self.global_stats_at(Utc::now()).await)
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| Error::Config(format!("history ttl out of range: {e}")))?;
        self.purge_before(Utc::now() - age).await
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = self.snapshot.as_deref() else {
            return Ok(());
        };

        let file = {
            let mut inner = self.inner.lock().await;
            if !inner.dirty {
                return Ok(());
            }
            inner.dirty = false;
            SnapshotFile {
                saved_at: Some(Utc::now()),
                users: inner
                    .stats
                    .keys()
                    .chain(inner.turns.keys())
                    .copied()
                    .collect::<std::collections::BTreeSet<_>>()
                    .into_iter()
                    .map(|id| UserRecord {
                        user_id: id,
                        stats: inner.stats.get(&id).cloned().unwrap_or_default(),
                        turns: inner.turns.get(&id).cloned().unwrap_or_default(),
                    })
                    .collect(),
            }
        };

        if let Err(e) = save_snapshot(path, &file).await {
            // Keep the data marked dirty so the next flush tries again.
            self.inner.lock().await.dirty = true;
            return Err(e);
        }
        debug!(path = %path.display(), users = file.users.len(), "history snapshot saved");
        Ok(())
    }
}

async fn load_snapshot(path: &Path) -> Result<Option<SnapshotFile>> {
    let txt = match tokio::fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if txt.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str(&txt) {
        Ok(file) => Ok(Some(file)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable history snapshot");
            Ok(None)
        }
    }
}

/// Write to a sibling temp file, then rename over the target.
async fn save_snapshot(path: &Path, file: &SnapshotFile) -> Result<()> {
    let txt = serde_json::to_string(file)?;
    let tmp = path.with_extension("json.tmp");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp, txt).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
