use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{ExchangeAdapter, InstrumentResolver, NetworkClient};
use crate::error::{OrchestratorError, TradeError};
use crate::execution::events::{EventSink, OrchestratorEvent, TracingEventSink};
use crate::execution::ledger::PositionLedger;
use crate::models::{
    ClosePolicy, CloseResult, Confirmation, HistoryStatus, InstrumentId, OpenInstructionParams,
    OpenIntent, OpenResult, Position, Side, TradeHistoryEntry, TradeKind, TxRef, UnsubmittedTx,
};
use crate::risk::{
    close_sizing, target_stop_price, validate_stop_side, CloseSizing, LiquidityFallback,
    ReservePolicy,
};

/// Knobs the orchestrator applies to every step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrchestratorPolicy {
    pub reserve: ReservePolicy,
    pub liquidity_fallback: LiquidityFallback,
}

/// Serializes select-then-mutate per side
#[derive(Debug, Default)]
struct SideLocks {
    long: Mutex<()>,
    short: Mutex<()>,
}

impl SideLocks {
    fn for_side(&self, side: Side) -> &Mutex<()> {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }
}

struct OpenOutcome {
    position: Position,
    tx_ref: TxRef,
    realized_spend: Option<u128>,
}

/// Why a step failed, and the transaction it had already submitted, if any
struct StepFailure {
    error: OrchestratorError,
    tx_ref: Option<TxRef>,
}

impl StepFailure {
    fn into_trade_error(self, elapsed: Duration) -> TradeError {
        TradeError::new(self.error, elapsed).with_tx_ref(self.tx_ref)
    }
}

impl From<OrchestratorError> for StepFailure {
    fn from(error: OrchestratorError) -> Self {
        Self {
            error,
            tx_ref: None,
        }
    }
}

struct CloseOutcome {
    candidate: Position,
    sizing: CloseSizing,
    tx_ref: TxRef,
    proceeds: u128,
}

/// Turns trade intents into confirmed on-chain orders and keeps the ledger in step.
///
/// Holds no state of its own besides the shared ledger handle; every call
/// appends exactly one history entry, success or failure.
pub struct PositionOrchestrator {
    adapter: Arc<dyn ExchangeAdapter>,
    resolver: Arc<dyn InstrumentResolver>,
    network: Arc<dyn NetworkClient>,
    ledger: Arc<Mutex<PositionLedger>>,
    events: Arc<dyn EventSink>,
    policy: OrchestratorPolicy,
    side_locks: SideLocks,
}

impl PositionOrchestrator {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        resolver: Arc<dyn InstrumentResolver>,
        network: Arc<dyn NetworkClient>,
        ledger: Arc<Mutex<PositionLedger>>,
    ) -> Self {
        Self {
            adapter,
            resolver,
            network,
            ledger,
            events: Arc::new(TracingEventSink),
            policy: OrchestratorPolicy::default(),
            side_locks: SideLocks::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_policy(mut self, policy: OrchestratorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &OrchestratorPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> Arc<Mutex<PositionLedger>> {
        self.ledger.clone()
    }

    /// Read-only snapshot of open positions, oldest first
    pub async fn get_open_positions(&self, side: Side) -> Vec<Position> {
        self.ledger.lock().await.open_positions(side)
    }

    /// Open a leveraged position for `intent`
    pub async fn open_position(
        &self,
        side: Side,
        intent: &OpenIntent,
    ) -> Result<OpenResult, TradeError> {
        let started = Instant::now();
        let kind = TradeKind::open(side);
        let description = format!(
            "open {} {} budget {} adverse {:.2}%",
            side,
            intent.instrument,
            intent.budget,
            intent.adverse_move_pct * 100.0
        );
        let params = json!({ "side": side, "intent": intent });

        tracing::info!("{}", description);

        let outcome = self.run_open(side, intent).await;

        let mut ledger = self.ledger.lock().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(outcome) => {
                let result = OpenResult {
                    order_ref: outcome.position.order_ref.clone(),
                    size: outcome.position.size,
                    margin: outcome.position.margin,
                    close_price: outcome.position.close_price,
                    leverage: outcome.position.leverage,
                    tx_ref: outcome.tx_ref.clone(),
                };

                // The order landed on chain; a ledger refusal must not hide that
                let conflict = ledger.add_position(outcome.position).err();
                if let Some(e) = &conflict {
                    tracing::error!(
                        order_ref = %result.order_ref,
                        tx_ref = %result.tx_ref,
                        "Confirmed open is not tracked by the ledger: {}",
                        e
                    );
                }

                ledger.append_history(TradeHistoryEntry {
                    id: Uuid::new_v4(),
                    kind,
                    description,
                    status: HistoryStatus::Completed,
                    tx_ref: Some(outcome.tx_ref),
                    params,
                    result: Some(json!({
                        "open": result,
                        "realizedSpend": outcome.realized_spend.map(|s| s.to_string()),
                        "ledgerConflict": conflict.map(|e| e.to_string()),
                    })),
                    error: None,
                    duration_ms: elapsed.as_millis() as u64,
                    recorded_at: Utc::now(),
                });

                tracing::info!(
                    order_ref = %result.order_ref,
                    size = %result.size,
                    close_price = %result.close_price,
                    "Opened {} position in {}ms",
                    side,
                    elapsed.as_millis()
                );
                Ok(result)
            }
            Err(failure) => {
                ledger.append_history(error_entry(kind, description, params, &failure, elapsed));
                tracing::error!(
                    "Open {} failed after {}ms: {}",
                    side,
                    elapsed.as_millis(),
                    failure.error
                );
                Err(failure.into_trade_error(elapsed))
            }
        }
    }

    /// Close all or part of the position `policy` selects
    pub async fn close_position(
        &self,
        side: Side,
        policy: &ClosePolicy,
    ) -> Result<CloseResult, TradeError> {
        let started = Instant::now();
        let kind = TradeKind::close(side);
        let description = format!(
            "close {} {:?} {}%",
            side, policy.ordering_key, policy.close_fraction
        );
        let params = json!({ "side": side, "policy": policy });

        tracing::info!("{}", description);

        let _side_guard = self.side_locks.for_side(side).lock().await;
        let outcome = self.run_close(side, policy).await;

        let mut ledger = self.ledger.lock().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(outcome) => {
                let result = CloseResult {
                    order_ref: outcome.candidate.order_ref.clone(),
                    realized_size: outcome.sizing.size,
                    proceeds: outcome.proceeds,
                    tx_ref: outcome.tx_ref.clone(),
                    fully_closed: outcome.sizing.full,
                };

                let conflict = ledger
                    .reduce_or_remove_position(
                        &outcome.candidate.order_ref,
                        outcome.sizing.size,
                        outcome.sizing.margin,
                    )
                    .err();
                if let Some(e) = &conflict {
                    tracing::error!(
                        order_ref = %result.order_ref,
                        tx_ref = %result.tx_ref,
                        "Confirmed close could not be applied to the ledger: {}",
                        e
                    );
                }

                ledger.append_history(TradeHistoryEntry {
                    id: Uuid::new_v4(),
                    kind,
                    description,
                    status: HistoryStatus::Completed,
                    tx_ref: Some(outcome.tx_ref),
                    params,
                    result: Some(json!({
                        "close": result,
                        "marginReleased": outcome.sizing.margin.to_string(),
                        "ledgerConflict": conflict.map(|e| e.to_string()),
                    })),
                    error: None,
                    duration_ms: elapsed.as_millis() as u64,
                    recorded_at: Utc::now(),
                });

                tracing::info!(
                    order_ref = %result.order_ref,
                    realized_size = %result.realized_size,
                    proceeds = %result.proceeds,
                    full = result.fully_closed,
                    "Closed {} position in {}ms",
                    side,
                    elapsed.as_millis()
                );
                Ok(result)
            }
            Err(failure) => {
                ledger.append_history(error_entry(kind, description, params, &failure, elapsed));
                tracing::error!(
                    "Close {} failed after {}ms: {}",
                    side,
                    elapsed.as_millis(),
                    failure.error
                );
                Err(failure.into_trade_error(elapsed))
            }
        }
    }

    async fn run_open(
        &self,
        side: Side,
        intent: &OpenIntent,
    ) -> Result<OpenOutcome, StepFailure> {
        let instrument = self.resolve(&intent.instrument).await?;

        let price = self
            .adapter
            .current_price(&instrument)
            .await
            .map_err(|e| OrchestratorError::QuoteFailed(e.to_string()))?;
        if price == 0 {
            return Err(OrchestratorError::InstrumentNotReady(format!(
                "{} has no price yet",
                intent.instrument
            ))
            .into());
        }

        let quote = match side {
            Side::Long => self.adapter.quote_buy_for_budget(price, intent.budget).await,
            Side::Short => self.adapter.quote_sell_for_budget(price, intent.budget).await,
        }
        .map_err(|e| OrchestratorError::QuoteFailed(e.to_string()))?;
        if quote.size == 0 {
            return Err(OrchestratorError::InvalidIntent(format!(
                "budget {} buys nothing at price {}",
                intent.budget, price
            ))
            .into());
        }
        self.events.emit(&OrchestratorEvent::Quote {
            instrument: instrument.clone(),
            price,
            size: quote.size,
            end_price: quote.end_price,
        });

        let size = self.liquidity_adjusted_size(&instrument, side, quote.size).await?;

        let target_price = target_stop_price(side, price, intent.adverse_move()?)?;
        let negotiation = self
            .adapter
            .negotiate_stop_loss(&instrument, side, size, target_price)
            .await
            .map_err(|e| OrchestratorError::StopLossNegotiationFailed(e.to_string()))?;
        validate_stop_side(side, price, negotiation.executable_price)?;
        self.events.emit(&OrchestratorEvent::Negotiate {
            target_price,
            executable_price: negotiation.executable_price,
            iterations: negotiation.iteration_count,
        });

        let reserve = self.policy.reserve.reserve_for(intent.budget)?;

        let pre_balance = self.balance().await;
        if let Some(available) = pre_balance {
            if available < reserve.required_balance() {
                self.events.emit(&OrchestratorEvent::InsufficientBalance {
                    required: reserve.required_balance(),
                    available,
                });
            }
        }

        let params = OpenInstructionParams {
            instrument_id: instrument.clone(),
            side,
            size,
            max_spend_cap: reserve.max_spend_cap,
            margin: reserve.margin,
            stop_price: negotiation.executable_price,
            prev_anchor: negotiation.prev_anchor.clone(),
            next_anchor: negotiation.next_anchor.clone(),
        };
        let tx = self
            .network
            .build_open_instruction(&params)
            .await
            .map_err(|e| OrchestratorError::ExecutionFailed(e.to_string()))?;
        let tx_ref = self.submit_and_confirm(TradeKind::open(side), &tx).await?;

        let post_balance = self.balance().await;
        let realized_spend = pre_balance
            .zip(post_balance)
            .map(|(pre, post)| pre.saturating_sub(post));

        Ok(OpenOutcome {
            position: Position {
                order_ref: tx.order_ref,
                instrument_id: instrument,
                side,
                size,
                margin: reserve.margin,
                close_price: negotiation.executable_price,
                opened_at: Utc::now(),
                leverage: negotiation.leverage,
                stop_loss_percentage: negotiation.stop_loss_percentage,
            },
            tx_ref,
            realized_spend,
        })
    }

    async fn run_close(
        &self,
        side: Side,
        policy: &ClosePolicy,
    ) -> Result<CloseOutcome, StepFailure> {
        let candidate = self
            .ledger
            .lock()
            .await
            .query_positions(side, policy.ordering_key)
            .into_iter()
            .next()
            .ok_or(OrchestratorError::NoMatchingPosition { side })?;

        let sizing = close_sizing(candidate.size, candidate.margin, policy.fraction()?)?;

        tracing::debug!(
            order_ref = %candidate.order_ref,
            size = %sizing.size,
            full = sizing.full,
            "Selected position to close"
        );

        let pre_balance = self.balance().await;
        let tx = self
            .network
            .build_close_instruction(&candidate.order_ref, sizing.size)
            .await
            .map_err(|e| OrchestratorError::ExecutionFailed(e.to_string()))?;
        let tx_ref = self.submit_and_confirm(TradeKind::close(side), &tx).await?;
        let post_balance = self.balance().await;

        let proceeds = pre_balance
            .zip(post_balance)
            .map(|(pre, post)| post.saturating_sub(pre))
            .unwrap_or(0);

        Ok(CloseOutcome {
            candidate,
            sizing,
            tx_ref,
            proceeds,
        })
    }

    async fn resolve(&self, name: &str) -> Result<InstrumentId, OrchestratorError> {
        match self.resolver.resolve_instrument(name).await {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(OrchestratorError::InstrumentNotReady(format!(
                "{} not found",
                name
            ))),
            Err(e) => Err(OrchestratorError::InstrumentNotReady(format!("{}: {}", name, e))),
        }
    }

    /// Shrink the quoted size to what the simulator says will fill. Never grows it.
    async fn liquidity_adjusted_size(
        &self,
        instrument: &InstrumentId,
        side: Side,
        provisional_size: u128,
    ) -> Result<u128, OrchestratorError> {
        match self
            .adapter
            .simulate_fill(instrument, provisional_size, side)
            .await
        {
            Ok(simulation) => {
                if simulation.suggested_size == 0 {
                    return Err(OrchestratorError::QuoteFailed(format!(
                        "no fillable liquidity for size {}",
                        provisional_size
                    )));
                }
                let clamped = simulation.suggested_size < provisional_size;
                let size = if clamped {
                    simulation.suggested_size
                } else {
                    provisional_size
                };
                self.events.emit(&OrchestratorEvent::Simulate {
                    provisional_size,
                    suggested_size: simulation.suggested_size,
                    clamped,
                });
                Ok(size)
            }
            Err(e) => match self.policy.liquidity_fallback {
                LiquidityFallback::ProceedUnadjusted => {
                    self.events.emit(&OrchestratorEvent::SimulateSkipped {
                        error: e.to_string(),
                    });
                    Ok(provisional_size)
                }
                LiquidityFallback::Abort => Err(OrchestratorError::QuoteFailed(format!(
                    "liquidity simulation failed: {}",
                    e
                ))),
            },
        }
    }

    async fn submit_and_confirm(
        &self,
        kind: TradeKind,
        tx: &UnsubmittedTx,
    ) -> Result<TxRef, StepFailure> {
        let tx_ref = self
            .network
            .submit(tx)
            .await
            .map_err(|e| OrchestratorError::ExecutionFailed(e.to_string()))?;
        self.events.emit(&OrchestratorEvent::Submit {
            kind,
            tx_ref: tx_ref.clone(),
        });

        let rejection = match self.network.await_confirmation(&tx_ref).await {
            Ok(Confirmation::Confirmed { .. }) => None,
            Ok(Confirmation::Failed(message)) => Some(message),
            Err(e) => Some(e.to_string()),
        };
        if let Some(message) = rejection {
            return Err(StepFailure {
                error: OrchestratorError::ExecutionFailed(message),
                tx_ref: Some(tx_ref),
            });
        }

        let log_lines = match self.network.fetch_execution_log(&tx_ref).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::debug!(tx_ref = %tx_ref, "Execution log unavailable: {}", e);
                Vec::new()
            }
        };
        self.events.emit(&OrchestratorEvent::Confirm {
            kind,
            tx_ref: tx_ref.clone(),
            log_lines,
        });

        Ok(tx_ref)
    }

    async fn balance(&self) -> Option<u128> {
        match self.network.available_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!("Balance lookup failed: {}", e);
                None
            }
        }
    }
}

fn error_entry(
    kind: TradeKind,
    description: String,
    params: serde_json::Value,
    failure: &StepFailure,
    elapsed: Duration,
) -> TradeHistoryEntry {
    TradeHistoryEntry {
        id: Uuid::new_v4(),
        kind,
        description,
        status: HistoryStatus::Error,
        tx_ref: failure.tx_ref.clone(),
        params,
        result: None,
        error: Some(failure.error.to_string()),
        duration_ms: elapsed.as_millis() as u64,
        recorded_at: Utc::now(),
    }
}
