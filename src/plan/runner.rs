use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::context::{BotContext, StepOutcome};
use super::{Plan, TradeStep};
use crate::error::TradeError;

#[derive(Debug)]
pub struct StepReport {
    pub index: usize,
    pub step: TradeStep,
    pub result: Result<StepOutcome, TradeError>,
}

#[derive(Debug, Default)]
pub struct PlanReport {
    pub steps: Vec<StepReport>,
    /// Steps never attempted, because of a failure or a stop request
    pub skipped: usize,
    pub stopped: bool,
}

impl PlanReport {
    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.steps.iter().filter(|s| s.result.is_err()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped == 0
    }
}

/// Runs plan steps one after another against a [`BotContext`]
pub struct PlanRunner {
    stop: Arc<AtomicBool>,
}

impl Default for PlanRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanRunner {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between steps; a step already in flight always finishes
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub async fn run(&self, ctx: &BotContext, plan: &Plan) -> PlanReport {
        let mut report = PlanReport::default();
        let total = plan.steps.len();

        for (index, step) in plan.steps.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                tracing::warn!("Stop requested, skipping remaining {} steps", total - index);
                report.stopped = true;
                report.skipped = total - index;
                break;
            }

            tracing::info!("Step {}/{}: {:?}", index + 1, total, step);
            let result = ctx.execute(step).await;

            let failed = match &result {
                Ok(outcome) => {
                    tracing::info!("Step {} done: {:?}", index + 1, outcome);
                    false
                }
                Err(e) => {
                    tracing::error!("Step {} failed: {}", index + 1, e);
                    true
                }
            };

            report.steps.push(StepReport {
                index,
                step: step.clone(),
                result,
            });

            if failed && !plan.continue_on_error {
                report.skipped = total - index - 1;
                break;
            }
        }

        tracing::info!(
            "Plan finished: {} succeeded, {} failed, {} skipped",
            report.succeeded(),
            report.failed(),
            report.skipped
        );

        report
    }
}
