use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::risk::Fraction;

/// Opaque identifier of a traded token/market on the exchange
pub type InstrumentId = String;

/// Opaque identifier of an on-chain order account
pub type OrderRef = String;

/// Transaction signature returned by the network client
pub type TxRef = String;

/// Serde helper for u128 amounts.
///
/// Amounts routinely exceed 2^53, so they are written as decimal strings.
/// Reading accepts either a string or a plain JSON integer.
pub mod amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(u128::from(n)),
        }
    }
}

/// Direction of a leveraged position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            other => Err(OrchestratorError::InvalidIntent(format!(
                "unknown side '{}'",
                other
            ))),
        }
    }
}

/// One open leveraged order tracked by the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub order_ref: OrderRef,
    pub instrument_id: InstrumentId,
    pub side: Side,
    #[serde(with = "amount")]
    pub size: u128, // token amount for Long, notional for Short
    #[serde(with = "amount")]
    pub margin: u128,
    #[serde(with = "amount")]
    pub close_price: u128,
    pub opened_at: DateTime<Utc>,
    pub leverage: f64,             // display only
    pub stop_loss_percentage: f64, // display only
}

/// Key used to pick a candidate when closing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderingKey {
    #[default]
    StartTimeAsc,
    StartTimeDesc,
    SizeAsc,
    SizeDesc,
}

/// Which position to close and how much of it
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClosePolicy {
    pub ordering_key: OrderingKey,
    pub close_fraction: f64, // percent in (0, 100]
}

impl ClosePolicy {
    pub fn new(ordering_key: OrderingKey, close_fraction: f64) -> Result<Self, OrchestratorError> {
        if !close_fraction.is_finite() || close_fraction <= 0.0 || close_fraction > 100.0 {
            return Err(OrchestratorError::InvalidIntent(format!(
                "close fraction must be in (0, 100], got {}",
                close_fraction
            )));
        }
        Fraction::from_percent(close_fraction)?;
        Ok(Self {
            ordering_key,
            close_fraction,
        })
    }

    /// Share of the position to close, exactly as written
    pub fn fraction(&self) -> Result<Fraction, OrchestratorError> {
        Fraction::from_percent(self.close_fraction)
    }

    pub fn is_full(&self) -> bool {
        self.close_fraction >= 100.0
    }
}

impl Default for ClosePolicy {
    fn default() -> Self {
        Self {
            ordering_key: OrderingKey::StartTimeAsc,
            close_fraction: 100.0,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClosePolicy {
    #[serde(default)]
    ordering_key: OrderingKey,
    #[serde(default = "full_fraction")]
    close_fraction: f64,
}

fn full_fraction() -> f64 {
    100.0
}

impl<'de> Deserialize<'de> for ClosePolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawClosePolicy::deserialize(deserializer)?;
        ClosePolicy::new(raw.ordering_key, raw.close_fraction).map_err(serde::de::Error::custom)
    }
}

/// "Spend `budget`, accept `adverse_move_pct` against me"
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenIntent {
    pub instrument: String,
    #[serde(with = "amount")]
    pub budget: u128,
    pub adverse_move_pct: f64, // fraction in (0, 1)
}

impl OpenIntent {
    pub fn new(
        instrument: impl Into<String>,
        budget: u128,
        adverse_move_pct: f64,
    ) -> Result<Self, OrchestratorError> {
        let instrument = instrument.into();
        if instrument.trim().is_empty() {
            return Err(OrchestratorError::InvalidIntent(
                "instrument name is empty".to_string(),
            ));
        }
        if budget == 0 {
            return Err(OrchestratorError::InvalidIntent(
                "budget must be positive".to_string(),
            ));
        }
        if !adverse_move_pct.is_finite() || adverse_move_pct <= 0.0 || adverse_move_pct >= 1.0 {
            return Err(OrchestratorError::InvalidIntent(format!(
                "adverse move must be in (0, 1), got {}",
                adverse_move_pct
            )));
        }
        Fraction::from_unit(adverse_move_pct)?;
        Ok(Self {
            instrument,
            budget,
            adverse_move_pct,
        })
    }

    /// Adverse move as an exact ratio for stop price math
    pub fn adverse_move(&self) -> Result<Fraction, OrchestratorError> {
        Fraction::from_unit(self.adverse_move_pct)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenIntent {
    instrument: String,
    #[serde(with = "amount")]
    budget: u128,
    adverse_move_pct: f64,
}

impl<'de> Deserialize<'de> for OpenIntent {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawOpenIntent::deserialize(deserializer)?;
        OpenIntent::new(raw.instrument, raw.budget, raw.adverse_move_pct)
            .map_err(serde::de::Error::custom)
    }
}

/// Result of quoting a budget against the bonding curve
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetQuote {
    #[serde(with = "amount")]
    pub end_price: u128,
    #[serde(with = "amount")]
    pub size: u128,
}

/// Liquidity simulator prediction for a fill
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FillSimulation {
    #[serde(with = "amount")]
    pub suggested_size: u128,
    #[serde(with = "amount")]
    pub suggested_budget: u128,
    pub completion_pct: f64,
    pub slippage_pct: f64,
}

/// Executable stop price plus linked-list anchors produced by the adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StopLossNegotiation {
    #[serde(with = "amount")]
    pub executable_price: u128,
    pub prev_anchor: Option<OrderRef>,
    pub next_anchor: Option<OrderRef>,
    pub leverage: f64,
    pub stop_loss_percentage: f64,
    #[serde(with = "amount")]
    pub trade_amount_estimate: u128,
    pub iteration_count: u32,
}

/// Everything the network client needs to assemble an open instruction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenInstructionParams {
    pub instrument_id: InstrumentId,
    pub side: Side,
    #[serde(with = "amount")]
    pub size: u128,
    #[serde(with = "amount")]
    pub max_spend_cap: u128,
    #[serde(with = "amount")]
    pub margin: u128,
    #[serde(with = "amount")]
    pub stop_price: u128,
    pub prev_anchor: Option<OrderRef>,
    pub next_anchor: Option<OrderRef>,
}

/// Assembled but not yet broadcast transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnsubmittedTx {
    pub order_ref: OrderRef,
    pub payload: String,
}

/// Outcome of waiting for a submitted transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Confirmed { slot: Option<u64> },
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenResult {
    pub order_ref: OrderRef,
    #[serde(with = "amount")]
    pub size: u128,
    #[serde(with = "amount")]
    pub margin: u128,
    #[serde(with = "amount")]
    pub close_price: u128,
    pub leverage: f64,
    pub tx_ref: TxRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloseResult {
    pub order_ref: OrderRef,
    #[serde(with = "amount")]
    pub realized_size: u128,
    #[serde(with = "amount")]
    pub proceeds: u128,
    pub tx_ref: TxRef,
    pub fully_closed: bool,
}

/// The four step types an orchestrator invocation can be
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl TradeKind {
    pub fn open(side: Side) -> Self {
        match side {
            Side::Long => TradeKind::OpenLong,
            Side::Short => TradeKind::OpenShort,
        }
    }

    pub fn close(side: Side) -> Self {
        match side {
            Side::Long => TradeKind::CloseLong,
            Side::Short => TradeKind::CloseShort,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Completed,
    Error,
}

/// Append-only audit record, one per orchestrator invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeHistoryEntry {
    pub id: Uuid,
    pub kind: TradeKind,
    pub description: String,
    pub status: HistoryStatus,
    pub tx_ref: Option<TxRef>,
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}
