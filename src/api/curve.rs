use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{encoded_path, JsonTransport};
use super::{ExchangeAdapter, InstrumentResolver};
use crate::models::{
    amount, BudgetQuote, FillSimulation, InstrumentId, Side, StopLossNegotiation,
};
use crate::Result;

/// Client for the bonding-curve quoting service
///
/// Endpoints (all JSON, amounts as decimal strings):
/// - `GET  /instruments/{name}`
/// - `GET  /instruments/{id}/price`
/// - `POST /quote/buy`, `POST /quote/sell`
/// - `POST /simulate`
/// - `POST /stop-loss`
#[derive(Clone)]
pub struct CurveClient {
    transport: JsonTransport,
}

#[derive(Debug, Deserialize)]
struct InstrumentResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(with = "amount")]
    price: u128,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequest {
    #[serde(with = "amount")]
    price: u128,
    #[serde(with = "amount")]
    budget: u128,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateRequest<'a> {
    instrument_id: &'a str,
    #[serde(with = "amount")]
    size: u128,
    side: Side,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopLossRequest<'a> {
    instrument_id: &'a str,
    side: Side,
    #[serde(with = "amount")]
    size: u128,
    #[serde(with = "amount")]
    target_price: u128,
}

impl CurveClient {
    pub fn new(base_url: &str, rate_limit_rpm: u32) -> anyhow::Result<Self> {
        Ok(Self {
            transport: JsonTransport::new("curve", base_url, rate_limit_rpm)?,
        })
    }

    pub fn with_transport(transport: JsonTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl InstrumentResolver for CurveClient {
    async fn resolve_instrument(&self, name: &str) -> Result<Option<InstrumentId>> {
        let response: Option<InstrumentResponse> = self
            .transport
            .get_optional(&encoded_path(&["instruments", name])?)
            .await?;
        Ok(response.map(|r| r.id))
    }
}

#[async_trait]
impl ExchangeAdapter for CurveClient {
    async fn current_price(&self, instrument: &InstrumentId) -> Result<u128> {
        let response: PriceResponse = self
            .transport
            .get_json(&encoded_path(&["instruments", instrument.as_str(), "price"])?)
            .await?;
        Ok(response.price)
    }

    async fn quote_buy_for_budget(&self, price: u128, budget: u128) -> Result<BudgetQuote> {
        let quote = self
            .transport
            .post_json("/quote/buy", &QuoteRequest { price, budget })
            .await?;
        Ok(quote)
    }

    async fn quote_sell_for_budget(&self, price: u128, budget: u128) -> Result<BudgetQuote> {
        let quote = self
            .transport
            .post_json("/quote/sell", &QuoteRequest { price, budget })
            .await?;
        Ok(quote)
    }

    async fn simulate_fill(
        &self,
        instrument: &InstrumentId,
        size: u128,
        side: Side,
    ) -> Result<FillSimulation> {
        let request = SimulateRequest {
            instrument_id: instrument,
            size,
            side,
        };
        Ok(self.transport.post_json("/simulate", &request).await?)
    }

    async fn negotiate_stop_loss(
        &self,
        instrument: &InstrumentId,
        side: Side,
        size: u128,
        target_price: u128,
    ) -> Result<StopLossNegotiation> {
        let request = StopLossRequest {
            instrument_id: instrument,
            side,
            size,
            target_price,
        };
        let negotiation: StopLossNegotiation =
            self.transport.post_json("/stop-loss", &request).await?;

        tracing::debug!(
            target_price = %target_price,
            executable_price = %negotiation.executable_price,
            iterations = negotiation.iteration_count,
            "Stop-loss negotiated"
        );

        Ok(negotiation)
    }
}
