use async_trait::async_trait;

use crate::models::{Confirmation, OpenInstructionParams, OrderRef, TxRef, UnsubmittedTx};
use crate::Result;

/// Builds, signs, broadcasts and confirms transactions
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn build_open_instruction(&self, params: &OpenInstructionParams)
        -> Result<UnsubmittedTx>;

    async fn build_close_instruction(&self, order_ref: &OrderRef, size: u128)
        -> Result<UnsubmittedTx>;

    async fn submit(&self, tx: &UnsubmittedTx) -> Result<TxRef>;

    /// Blocks until the transaction lands or the client's own timeout expires
    async fn await_confirmation(&self, tx_ref: &TxRef) -> Result<Confirmation>;

    /// Program log lines of a confirmed transaction (observability only)
    async fn fetch_execution_log(&self, tx_ref: &TxRef) -> Result<Vec<String>>;

    /// Collateral currently available to the signing wallet
    async fn available_balance(&self) -> Result<u128>;
}
