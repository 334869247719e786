// Declarative trade plans and their sequential execution
pub mod context;
pub mod runner;

pub use context::{BotContext, Collaborators, StepOutcome};
pub use runner::{PlanReport, PlanRunner, StepReport};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::{ClosePolicy, OpenIntent, Side};
use crate::Result;

/// One plan step; payloads are validated while deserializing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeStep {
    OpenLong(OpenIntent),
    OpenShort(OpenIntent),
    /// Defaults: oldest position first, full close
    CloseLong(ClosePolicy),
    /// Defaults: oldest position first, full close
    CloseShort(ClosePolicy),
}

impl TradeStep {
    pub fn side(&self) -> Side {
        match self {
            TradeStep::OpenLong(_) | TradeStep::CloseLong(_) => Side::Long,
            TradeStep::OpenShort(_) | TradeStep::CloseShort(_) => Side::Short,
        }
    }
}

/// Ordered list of steps run one at a time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub steps: Vec<TradeStep>,
    /// Keep going after a failed step instead of stopping the run
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Plan {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        let plan = Self::from_json(&contents)?;
        tracing::info!(
            "Loaded plan with {} steps from {}",
            plan.steps.len(),
            path.as_ref().display()
        );
        Ok(plan)
    }
}
