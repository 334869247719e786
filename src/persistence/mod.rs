// Durable ledger storage
pub mod file;
pub mod redis;

pub use self::file::JsonFileStore;
pub use self::redis::RedisLedgerStore;

use async_trait::async_trait;

use crate::execution::LedgerSnapshot;
use crate::Result;

/// Somewhere a ledger snapshot survives process restarts
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()>;

    /// `None` when nothing was ever saved
    async fn load(&self) -> Result<Option<LedgerSnapshot>>;
}
