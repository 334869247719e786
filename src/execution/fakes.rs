//! In-memory collaborators for orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{ExchangeAdapter, InstrumentResolver, NetworkClient};
use crate::models::{
    BudgetQuote, Confirmation, FillSimulation, InstrumentId, OpenInstructionParams, OrderRef,
    Side, StopLossNegotiation, TxRef, UnsubmittedTx,
};
use crate::Result;

pub const OPEN_SPEND: u128 = 1_000;
pub const CLOSE_PROCEEDS: u128 = 2_500;

pub struct FakeExchange {
    price: u128,
    quote_size: u128,
    suggested_size: Mutex<Option<u128>>,
    simulation_error: Mutex<Option<String>>,
    executable_price: Mutex<Option<u128>>,
    last_target: Mutex<Option<u128>>,
}

impl FakeExchange {
    pub fn new(price: u128) -> Self {
        Self {
            price,
            quote_size: 1_000_000,
            suggested_size: Mutex::new(None),
            simulation_error: Mutex::new(None),
            executable_price: Mutex::new(None),
            last_target: Mutex::new(None),
        }
    }

    pub fn quoted_size(&self) -> u128 {
        self.quote_size
    }

    pub fn set_suggested_size(&self, size: u128) {
        *self.suggested_size.lock().unwrap() = Some(size);
    }

    pub fn fail_simulation(&self, message: &str) {
        *self.simulation_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_executable_price(&self, price: u128) {
        *self.executable_price.lock().unwrap() = Some(price);
    }

    pub fn last_target_price(&self) -> Option<u128> {
        *self.last_target.lock().unwrap()
    }
}

#[async_trait]
impl ExchangeAdapter for FakeExchange {
    async fn current_price(&self, _instrument: &InstrumentId) -> Result<u128> {
        Ok(self.price)
    }

    async fn quote_buy_for_budget(&self, price: u128, _budget: u128) -> Result<BudgetQuote> {
        Ok(BudgetQuote {
            end_price: price + 500,
            size: self.quote_size,
        })
    }

    async fn quote_sell_for_budget(&self, price: u128, _budget: u128) -> Result<BudgetQuote> {
        Ok(BudgetQuote {
            end_price: price - 500,
            size: self.quote_size,
        })
    }

    async fn simulate_fill(
        &self,
        _instrument: &InstrumentId,
        size: u128,
        _side: Side,
    ) -> Result<FillSimulation> {
        if let Some(message) = self.simulation_error.lock().unwrap().clone() {
            return Err(message.into());
        }
        let suggested_size = self.suggested_size.lock().unwrap().unwrap_or(size);
        Ok(FillSimulation {
            suggested_size,
            suggested_budget: 0,
            completion_pct: 100.0,
            slippage_pct: 0.4,
        })
    }

    async fn negotiate_stop_loss(
        &self,
        _instrument: &InstrumentId,
        side: Side,
        _size: u128,
        target_price: u128,
    ) -> Result<StopLossNegotiation> {
        *self.last_target.lock().unwrap() = Some(target_price);
        let executable_price = self.executable_price.lock().unwrap().unwrap_or(match side {
            Side::Long => self.price * 852 / 1_000,
            Side::Short => self.price * 1_148 / 1_000,
        });
        Ok(StopLossNegotiation {
            executable_price,
            prev_anchor: Some("prev-order".to_string()),
            next_anchor: Some("next-order".to_string()),
            leverage: 6.7,
            stop_loss_percentage: 14.8,
            trade_amount_estimate: self.quote_size,
            iteration_count: 4,
        })
    }
}

#[async_trait]
impl InstrumentResolver for FakeExchange {
    async fn resolve_instrument(&self, name: &str) -> Result<Option<InstrumentId>> {
        Ok(match name {
            "PEPE" => Some("pepe-mint".to_string()),
            "WIF" => Some("wif-mint".to_string()),
            _ => None,
        })
    }
}

pub struct FakeNetwork {
    balance: Mutex<u128>,
    counter: AtomicU64,
    open_params: Mutex<Vec<OpenInstructionParams>>,
    close_requests: Mutex<Vec<(OrderRef, u128)>>,
    pending: Mutex<HashMap<TxRef, bool>>,
    confirm_failure: Mutex<Option<String>>,
    fixed_order_ref: Mutex<Option<OrderRef>>,
}

impl FakeNetwork {
    pub fn new(balance: u128) -> Self {
        Self {
            balance: Mutex::new(balance),
            counter: AtomicU64::new(0),
            open_params: Mutex::new(Vec::new()),
            close_requests: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            confirm_failure: Mutex::new(None),
            fixed_order_ref: Mutex::new(None),
        }
    }

    pub fn set_balance(&self, balance: u128) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn fail_confirmation(&self, message: &str) {
        *self.confirm_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Every open built from now on reuses this order ref.
    pub fn repeat_order_ref(&self, order_ref: &str) {
        *self.fixed_order_ref.lock().unwrap() = Some(order_ref.to_string());
    }

    pub fn open_params(&self) -> Vec<OpenInstructionParams> {
        self.open_params.lock().unwrap().clone()
    }

    pub fn close_requests(&self) -> Vec<(OrderRef, u128)> {
        self.close_requests.lock().unwrap().clone()
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl NetworkClient for FakeNetwork {
    async fn build_open_instruction(
        &self,
        params: &OpenInstructionParams,
    ) -> Result<UnsubmittedTx> {
        self.open_params.lock().unwrap().push(params.clone());
        let id = self.next_id();
        let order_ref = self
            .fixed_order_ref
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("order-{}", id));
        Ok(UnsubmittedTx {
            order_ref,
            payload: "open".to_string(),
        })
    }

    async fn build_close_instruction(
        &self,
        order_ref: &OrderRef,
        size: u128,
    ) -> Result<UnsubmittedTx> {
        self.close_requests
            .lock()
            .unwrap()
            .push((order_ref.clone(), size));
        Ok(UnsubmittedTx {
            order_ref: order_ref.clone(),
            payload: "close".to_string(),
        })
    }

    async fn submit(&self, tx: &UnsubmittedTx) -> Result<TxRef> {
        let tx_ref = format!("sig-{}", self.next_id());
        self.pending
            .lock()
            .unwrap()
            .insert(tx_ref.clone(), tx.payload == "open");
        Ok(tx_ref)
    }

    async fn await_confirmation(&self, tx_ref: &TxRef) -> Result<Confirmation> {
        if let Some(message) = self.confirm_failure.lock().unwrap().clone() {
            return Ok(Confirmation::Failed(message));
        }
        let is_open = self.pending.lock().unwrap().remove(tx_ref).unwrap_or(false);
        let mut balance = self.balance.lock().unwrap();
        if is_open {
            *balance = balance.saturating_sub(OPEN_SPEND);
        } else {
            *balance += CLOSE_PROCEEDS;
        }
        Ok(Confirmation::Confirmed { slot: Some(42) })
    }

    async fn fetch_execution_log(&self, _tx_ref: &TxRef) -> Result<Vec<String>> {
        Ok(vec!["Program log: Instruction: OpenPosition".to_string()])
    }

    async fn available_balance(&self) -> Result<u128> {
        Ok(*self.balance.lock().unwrap())
    }
}
