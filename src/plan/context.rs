use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::TradeStep;
use crate::api::{ExchangeAdapter, InstrumentResolver, NetworkClient};
use crate::error::TradeError;
use crate::execution::{
    EventSink, LedgerSnapshot, OrchestratorPolicy, PositionLedger, PositionOrchestrator,
    TracingEventSink,
};
use crate::models::{CloseResult, OpenResult};
use crate::persistence::LedgerStore;
use crate::Result;

/// External services a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub resolver: Arc<dyn InstrumentResolver>,
    pub network: Arc<dyn NetworkClient>,
    pub events: Arc<dyn EventSink>,
}

impl Collaborators {
    /// One client serving both quoting and instrument lookup
    pub fn new<C>(curve: Arc<C>, network: Arc<dyn NetworkClient>) -> Self
    where
        C: ExchangeAdapter + InstrumentResolver + 'static,
    {
        Self {
            adapter: curve.clone(),
            resolver: curve,
            network,
            events: Arc::new(TracingEventSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Opened(OpenResult),
    Closed(CloseResult),
}

/// Everything one run needs: the orchestrator, its ledger and where the
/// ledger is persisted.
///
/// Built at run start from the last saved snapshot, flushed after every
/// step and once more on shutdown.
pub struct BotContext {
    orchestrator: PositionOrchestrator,
    ledger: Arc<Mutex<PositionLedger>>,
    store: Option<Arc<dyn LedgerStore>>,
}

impl BotContext {
    pub async fn start(
        collaborators: Collaborators,
        policy: OrchestratorPolicy,
        store: Option<Arc<dyn LedgerStore>>,
    ) -> Result<Self> {
        let ledger = match &store {
            Some(store) => match store.load().await? {
                Some(snapshot) => {
                    tracing::info!(
                        "Restored ledger with {} open positions",
                        snapshot.positions.len()
                    );
                    PositionLedger::with_snapshot(snapshot)?
                }
                None => PositionLedger::new(),
            },
            None => PositionLedger::new(),
        };

        let ledger = Arc::new(Mutex::new(ledger));
        let orchestrator = PositionOrchestrator::new(
            collaborators.adapter,
            collaborators.resolver,
            collaborators.network,
            ledger.clone(),
        )
        .with_events(collaborators.events)
        .with_policy(policy);

        Ok(Self {
            orchestrator,
            ledger,
            store,
        })
    }

    pub fn orchestrator(&self) -> &PositionOrchestrator {
        &self.orchestrator
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.lock().await.snapshot()
    }

    /// Run one step and persist the ledger afterwards, whatever the outcome
    pub async fn execute(&self, step: &TradeStep) -> std::result::Result<StepOutcome, TradeError> {
        let outcome = match step {
            TradeStep::OpenLong(intent) | TradeStep::OpenShort(intent) => self
                .orchestrator
                .open_position(step.side(), intent)
                .await
                .map(StepOutcome::Opened),
            TradeStep::CloseLong(policy) | TradeStep::CloseShort(policy) => self
                .orchestrator
                .close_position(step.side(), policy)
                .await
                .map(StepOutcome::Closed),
        };

        // The chain already moved; a failed write must not turn success into failure
        if let Err(e) = self.flush().await {
            tracing::error!("Failed to persist ledger: {}", e);
        }

        outcome
    }

    pub async fn flush(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        store.save(&snapshot).await
    }

    /// Final flush; hands back what was persisted
    pub async fn shutdown(self) -> Result<LedgerSnapshot> {
        self.flush().await?;
        let snapshot = self.snapshot().await;
        tracing::info!(
            "Run finished with {} open positions, {} history entries",
            snapshot.positions.len(),
            snapshot.history.len()
        );
        Ok(snapshot)
    }
}
