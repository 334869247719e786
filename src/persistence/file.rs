use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::LedgerStore;
use crate::execution::LedgerSnapshot;
use crate::Result;

/// Pretty-printed JSON snapshot on local disk
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;

        // Atomic replace via rename
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            "Saved ledger ({} positions) to {}",
            snapshot.positions.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<LedgerSnapshot>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let snapshot: LedgerSnapshot = serde_json::from_str(&contents)?;
                tracing::info!(
                    "Loaded ledger ({} positions) from {}",
                    snapshot.positions.len(),
                    self.path.display()
                );
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
