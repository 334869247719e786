// Position orchestration and the ledger it keeps in step
pub mod events;
pub mod ledger;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod fakes;

pub use events::{EventSink, MemoryEventSink, OrchestratorEvent, TracingEventSink};
pub use ledger::{LedgerSnapshot, PositionLedger, Reduction};
pub use orchestrator::{OrchestratorPolicy, PositionOrchestrator};
