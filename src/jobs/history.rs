//! Run history collaborator
//!
//! Successful runs of signed-in users are handed to a [`HistorySink`]. The
//! engine never depends on this succeeding: [`record_history`] logs and
//! swallows every failure.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::redis_manager::keys;

/// Entries kept per user
pub const HISTORY_LIMIT: isize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user_id: String,
    pub language: String,
    pub code: String,
    pub output: String,
    pub title: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
}

impl HistoryEntry {
    pub fn new(
        user_id: impl Into<String>,
        language: impl Into<String>,
        code: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            user_id: user_id.into(),
            language: language.into(),
            code: code.into(),
            output: output.into(),
            title: format!("Run at {}", created_at),
            created_at,
        }
    }
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, entry: &HistoryEntry) -> Result<()>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

#[async_trait]
impl HistorySink for NoHistory {
    async fn record(&self, _entry: &HistoryEntry) -> Result<()> {
        Ok(())
    }
}

/// Keeps the most recent entries per user in a Redis list
#[derive(Clone)]
pub struct RedisHistory {
    conn: ConnectionManager,
}

impl RedisHistory {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl HistorySink for RedisHistory {
    async fn record(&self, entry: &HistoryEntry) -> Result<()> {
        let key = format!("{}{}", keys::HISTORY_PREFIX, entry.user_id);
        let json = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();

        conn.lpush::<_, _, ()>(&key, &json)
            .await
            .with_context(|| format!("Failed to push history entry to {}", key))?;
        conn.ltrim::<_, ()>(&key, 0, HISTORY_LIMIT - 1)
            .await
            .with_context(|| format!("Failed to trim history {}", key))?;
        Ok(())
    }
}

/// Record an entry; failures are logged, never propagated
pub async fn record_history(sink: &dyn HistorySink, entry: HistoryEntry) {
    match sink.record(&entry).await {
        Ok(()) => debug!("Recorded history entry for user {}", entry.user_id),
        Err(e) => warn!(
            "Failed to save history for user {}: {:#}",
            entry.user_id, e
        ),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every recorded entry in memory
    #[derive(Default)]
    pub(crate) struct MemoryHistory {
        pub(crate) entries: Mutex<Vec<HistoryEntry>>,
    }

    #[async_trait]
    impl HistorySink for MemoryHistory {
        async fn record(&self, entry: &HistoryEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    /// Fails every write
    pub(crate) struct BrokenHistory;

    #[async_trait]
    impl HistorySink for BrokenHistory {
        async fn record(&self, _entry: &HistoryEntry) -> Result<()> {
            anyhow::bail!("database unavailable")
        }
    }
}
