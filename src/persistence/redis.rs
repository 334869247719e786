use std::collections::HashMap;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use tokio::time::{timeout, Duration};

use super::LedgerStore;
use crate::execution::LedgerSnapshot;
use crate::models::{Position, TradeHistoryEntry};
use crate::Result;

/// Redis-backed ledger store
///
/// Open positions live in a hash keyed by `order_ref`, history in a list:
/// - `curvebot:{wallet}:positions`
/// - `curvebot:{wallet}:history`
pub struct RedisLedgerStore {
    conn: ConnectionManager,
    positions_key: String,
    history_key: String,
}

impl RedisLedgerStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `wallet` - Namespace for the keys, one ledger per signing wallet
    pub async fn new(redis_url: &str, wallet: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            positions_key: format!("curvebot:{}:positions", wallet),
            history_key: format!("curvebot:{}:history", wallet),
        })
    }

    /// Drop everything stored for this wallet
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = ::redis::pipe()
            .atomic()
            .del(&self.positions_key)
            .ignore()
            .del(&self.history_key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RedisLedgerStore {
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let positions = snapshot
            .positions
            .iter()
            .map(|p| -> Result<(String, String)> {
                Ok((p.order_ref.clone(), serde_json::to_string(p)?))
            })
            .collect::<Result<Vec<(String, String)>>>()?;
        let history = snapshot
            .history
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .del(&self.positions_key)
            .ignore()
            .del(&self.history_key)
            .ignore();
        if !positions.is_empty() {
            pipe.hset_multiple(&self.positions_key, &positions).ignore();
        }
        if !history.is_empty() {
            pipe.rpush(&self.history_key, history).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!(
            "Saved {} positions and {} history entries to Redis",
            snapshot.positions.len(),
            snapshot.history.len()
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<LedgerSnapshot>> {
        let mut conn = self.conn.clone();

        let raw_positions: HashMap<String, String> = conn.hgetall(&self.positions_key).await?;
        let raw_history: Vec<String> = conn.lrange(&self.history_key, 0, -1).await?;

        if raw_positions.is_empty() && raw_history.is_empty() {
            return Ok(None);
        }

        let mut positions = raw_positions
            .values()
            .map(|json| serde_json::from_str::<Position>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));

        let history = raw_history
            .iter()
            .map(|json| serde_json::from_str::<TradeHistoryEntry>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::info!(
            "Loaded {} positions and {} history entries from Redis",
            positions.len(),
            history.len()
        );

        Ok(Some(LedgerSnapshot { positions, history }))
    }
}
