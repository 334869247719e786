use async_trait::async_trait;

use crate::models::{BudgetQuote, FillSimulation, InstrumentId, Side, StopLossNegotiation};
use crate::Result;

/// Pricing, quoting and stop-loss negotiation against the bonding curve.
///
/// All prices and amounts are raw integer units.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn current_price(&self, instrument: &InstrumentId) -> Result<u128>;

    /// Size bought by spending `budget` starting at `price`, and where the price ends up
    async fn quote_buy_for_budget(&self, price: u128, budget: u128) -> Result<BudgetQuote>;

    /// Short-side counterpart of [`ExchangeAdapter::quote_buy_for_budget`]
    async fn quote_sell_for_budget(&self, price: u128, budget: u128) -> Result<BudgetQuote>;

    async fn simulate_fill(
        &self,
        instrument: &InstrumentId,
        size: u128,
        side: Side,
    ) -> Result<FillSimulation>;

    /// Bounded iterative search for a stop price the order list can actually hold
    async fn negotiate_stop_loss(
        &self,
        instrument: &InstrumentId,
        side: Side,
        size: u128,
        target_price: u128,
    ) -> Result<StopLossNegotiation>;
}

/// Maps a human instrument name to its on-chain identifier
#[async_trait]
pub trait InstrumentResolver: Send + Sync {
    async fn resolve_instrument(&self, name: &str) -> Result<Option<InstrumentId>>;
}
