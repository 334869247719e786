use std::sync::Mutex;

use serde::Serialize;

use crate::models::{InstrumentId, TradeKind, TxRef};

/// One event per step phase, emitted in the order the phases run
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Quote {
        instrument: InstrumentId,
        price: u128,
        size: u128,
        end_price: u128,
    },
    Simulate {
        provisional_size: u128,
        suggested_size: u128,
        clamped: bool,
    },
    /// Simulator failed and the quoted size went ahead unvalidated
    SimulateSkipped { error: String },
    Negotiate {
        target_price: u128,
        executable_price: u128,
        iterations: u32,
    },
    /// Non-fatal: the instruction itself is the authoritative balance guard
    InsufficientBalance { required: u128, available: u128 },
    Submit { kind: TradeKind, tx_ref: TxRef },
    Confirm {
        kind: TradeKind,
        tx_ref: TxRef,
        log_lines: Vec<String>,
    },
}

/// Consumer of orchestrator events, decoupled from control flow
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &OrchestratorEvent);
}

/// Writes every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &OrchestratorEvent) {
        match event {
            OrchestratorEvent::Quote {
                instrument,
                price,
                size,
                end_price,
            } => tracing::info!(
                instrument = %instrument,
                price = %price,
                size = %size,
                end_price = %end_price,
                "quote"
            ),
            OrchestratorEvent::Simulate {
                provisional_size,
                suggested_size,
                clamped,
            } => tracing::info!(
                provisional_size = %provisional_size,
                suggested_size = %suggested_size,
                clamped,
                "simulate"
            ),
            OrchestratorEvent::SimulateSkipped { error } => {
                tracing::warn!(error = %error, "simulate failed, using quoted size")
            }
            OrchestratorEvent::Negotiate {
                target_price,
                executable_price,
                iterations,
            } => tracing::info!(
                target_price = %target_price,
                executable_price = %executable_price,
                iterations,
                "negotiate"
            ),
            OrchestratorEvent::InsufficientBalance {
                required,
                available,
            } => tracing::warn!(
                required = %required,
                available = %available,
                "insufficient balance, submitting anyway"
            ),
            OrchestratorEvent::Submit { kind, tx_ref } => {
                tracing::info!(kind = ?kind, tx_ref = %tx_ref, "submit")
            }
            OrchestratorEvent::Confirm {
                kind,
                tx_ref,
                log_lines,
            } => {
                tracing::info!(kind = ?kind, tx_ref = %tx_ref, "confirm");
                for line in log_lines {
                    tracing::debug!(tx_ref = %tx_ref, "{}", line);
                }
            }
        }
    }
}

/// Keeps events in memory, for tests and post-run inspection
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<OrchestratorEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrchestratorEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &OrchestratorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
