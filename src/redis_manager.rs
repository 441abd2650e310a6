//! Redis Manager - queue consumption and result delivery
//!
//! - Run job queue operations (BLPOP)
//! - Result storage and publishing
//! - Connections shared with the history sink

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::jobs::{RunRequest, RunResponse};

/// Redis key constants
pub mod keys {
    /// Run job queue key
    pub const QUEUE: &str = "runner:queue";

    /// Run result key prefix (for polling)
    pub const RESULT_PREFIX: &str = "runner:result:";

    /// Run result channel (for pub/sub)
    pub const RESULT_CHANNEL: &str = "runner:results";

    /// Per-user run history list prefix
    pub const HISTORY_PREFIX: &str = "runner:history:";
}

pub const RESULT_EXPIRY_SECS: u64 = 3600; // 1 hour

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Owns the blocking queue connection.
///
/// BLPOP parks its connection until a job arrives, so results and history
/// go through a separate [`ResultStore`].
pub struct RedisManager {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisManager {
    async fn with_url(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = get_connection_with_retry(&client).await?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self { client, conn })
    }

    /// Create a new RedisManager using the REDIS_URL environment variable.
    /// Defaults to "redis://localhost:6379" if not set.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.into());
        Self::with_url(&url).await
    }

    /// Block and wait for the next run request.
    ///
    /// Reconnects on connection failure; malformed payloads are logged and skipped.
    pub async fn pop_job(&mut self) -> Result<RunRequest> {
        loop {
            let result: Option<(String, String)> =
                match self.conn.blpop(keys::QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                        self.reconnect().await?;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match serde_json::from_str::<RunRequest>(&job_data) {
                    Ok(job) => return Ok(job),
                    Err(e) => {
                        warn!("Failed to parse job data: {}. Data: {}", e, job_data);
                        continue;
                    }
                }
            }
        }
    }

    /// Open the auto-reconnecting connection used for results and history
    pub async fn result_store(&self) -> Result<ResultStore> {
        let conn = self
            .client
            .get_connection_manager()
            .await
            .context("Failed to open Redis connection manager")?;
        Ok(ResultStore { conn })
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.conn = get_connection_with_retry(&self.client).await?;
        Ok(())
    }
}

/// Writes results back for pollers and subscribers. Cheap to clone.
#[derive(Clone)]
pub struct ResultStore {
    conn: ConnectionManager,
}

impl ResultStore {
    /// Store a run result under its request id with a 1-hour expiration,
    /// then publish it for real-time subscribers.
    pub async fn store_result(&self, result: &RunResponse) -> Result<()> {
        let json = serde_json::to_string(result)?;
        let key = format!("{}{}", keys::RESULT_PREFIX, result.request_id);
        let mut conn = self.conn.clone();

        conn.set_ex::<_, _, ()>(&key, &json, RESULT_EXPIRY_SECS)
            .await
            .with_context(|| format!("Failed to store result {}", key))?;

        // No subscribers is not an error
        if let Err(e) = conn
            .publish::<_, _, ()>(keys::RESULT_CHANNEL, &json)
            .await
        {
            warn!("Failed to publish result {}: {}", result.request_id, e);
        }

        Ok(())
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
