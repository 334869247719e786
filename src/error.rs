use std::time::Duration;

use thiserror::Error;

use crate::models::{OrderRef, Side, TxRef};

/// Failures an orchestrator step can end with
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    #[error("instrument not ready: {0}")]
    InstrumentNotReady(String),

    #[error("quote failed: {0}")]
    QuoteFailed(String),

    #[error("stop-loss negotiation failed: {0}")]
    StopLossNegotiationFailed(String),

    #[error("no open {side} position matches the close policy")]
    NoMatchingPosition { side: Side },

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Ledger invariant violations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("position {0} already exists")]
    DuplicateOrderRef(OrderRef),

    #[error("position {0} not found")]
    UnknownOrderRef(OrderRef),

    #[error("cannot reduce position {order_ref} by {requested}, only {available} open")]
    ReductionExceedsSize {
        order_ref: OrderRef,
        requested: u128,
        available: u128,
    },
}

/// A failed step together with how long it ran
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} (after {}ms)", .elapsed.as_millis())]
pub struct TradeError {
    pub kind: OrchestratorError,
    pub elapsed: Duration,
    /// Set when the transaction was submitted before the step failed
    pub tx_ref: Option<TxRef>,
}

impl TradeError {
    pub fn new(kind: OrchestratorError, elapsed: Duration) -> Self {
        Self {
            kind,
            elapsed,
            tx_ref: None,
        }
    }

    pub fn with_tx_ref(mut self, tx_ref: Option<TxRef>) -> Self {
        self.tx_ref = tx_ref;
        self
    }

    pub fn kind(&self) -> &OrchestratorError {
        &self.kind
    }
}
