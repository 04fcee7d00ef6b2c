//! Scheduled sweeps: offer expiry, bid expiry and overdue repayments.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use crate::background::BackgroundHandle;
use crate::config::WorkflowConfig;
use crate::workflow::FinancingWorkflow;

/// Outcome of one sweep run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Candidates matching the predicate when the sweep started.
    pub examined: usize,
    /// Records actually transitioned.
    pub updated: usize,
}

pub struct SweepScheduler {
    workflow: FinancingWorkflow,
    config: WorkflowConfig,
}

impl SweepScheduler {
    pub fn new(workflow: FinancingWorkflow, config: WorkflowConfig) -> Self {
        Self { workflow, config }
    }

    /// Start the three sweeps on their configured intervals.
    pub fn spawn(self) -> BackgroundHandle {
        let mut handle = BackgroundHandle::new();

        let negotiation = self.workflow.negotiation.clone();
        handle.every(
            "offer-expiry",
            Duration::from_secs(self.config.offer_sweep_interval_secs),
            move || {
                let negotiation = negotiation.clone();
                async move {
                    if let Err(err) = negotiation.sweep_expired_offers(Utc::now()).await {
                        error!(error = %err, "offer expiry sweep failed");
                    }
                }
            },
        );

        let auction = self.workflow.auction.clone();
        handle.every(
            "bid-expiry",
            Duration::from_secs(self.config.bid_sweep_interval_secs),
            move || {
                let auction = auction.clone();
                async move {
                    if let Err(err) = auction.sweep_expired_bids(Utc::now()).await {
                        error!(error = %err, "bid expiry sweep failed");
                    }
                }
            },
        );

        let ledger = self.workflow.ledger.clone();
        handle.every(
            "repayment-overdue",
            Duration::from_secs(self.config.repayment_sweep_interval_secs),
            move || {
                let ledger = ledger.clone();
                async move {
                    if let Err(err) = ledger.sweep_overdue(Utc::now()).await {
                        error!(error = %err, "overdue repayment sweep failed");
                    }
                }
            },
        );

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    #[tokio::test]
    async fn scheduler_starts_one_task_per_sweep_and_stops() {
        let h = Harness::new();
        let handle = SweepScheduler::new(h.workflow.clone(), WorkflowConfig::default()).spawn();
        assert_eq!(handle.len(), 3);
        handle.shutdown().await;
    }
}
