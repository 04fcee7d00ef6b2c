//! Background worker draining the contract outbox.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::background::BackgroundHandle;
use crate::error::WorkflowResult;
use crate::workflow::ContractOutbox;

pub struct ContractJobWorker {
    outbox: ContractOutbox,
    poll_interval: Duration,
}

impl ContractJobWorker {
    pub fn new(outbox: ContractOutbox, poll_interval: Duration) -> Self {
        Self {
            outbox,
            poll_interval,
        }
    }

    /// Run every job that is ready at `now`. Returns how many were attempted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> WorkflowResult<usize> {
        let mut attempted = 0;
        while let Some(job) = self.outbox.jobs().claim_next(now)? {
            attempted += 1;
            if let Err(err) = self.outbox.run_job(job, now).await {
                error!(error = %err, "could not record contract job outcome");
            }
        }
        if attempted > 0 {
            info!(attempted, "contract outbox drained");
        }
        Ok(attempted)
    }

    pub fn spawn(self) -> BackgroundHandle {
        let mut handle = BackgroundHandle::new();
        let period = self.poll_interval;
        let worker = std::sync::Arc::new(self);
        handle.every("contract-worker", period, move || {
            let worker = worker.clone();
            async move {
                if let Err(err) = worker.run_once(Utc::now()).await {
                    error!(error = %err, "contract worker poll failed");
                }
            }
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ContractTarget, JobStatus, JobStore};
    use crate::test_support::{Harness, buyer, now, seller};
    use crate::workflow::ContractOutcome;
    use scf_financing::{Actor, BankAccountId, FundingType};

    #[tokio::test]
    async fn deferred_contract_is_generated_once_the_directory_recovers() {
        let h = Harness::new();
        let (b, s) = (buyer(), seller());
        let (offer, _) = h.accepted_offer(&b, &s).await;
        h.workflow
            .negotiation
            .select_funding_type(&Actor::Buyer(b), offer.id, FundingType::SelfFunded, now())
            .await
            .unwrap();
        let account = BankAccountId::generate();
        h.adapters.bank_accounts.register(account, b.entity_id);

        h.adapters.parties.set_unavailable(true);
        let authorized = h
            .workflow
            .negotiation
            .authorize_payment(&Actor::Buyer(b), offer.id, account, now())
            .await
            .unwrap();
        let ContractOutcome::Deferred { job_id, .. } = authorized.contract else {
            panic!("expected a deferred contract, got {:?}", authorized.contract);
        };

        let worker = ContractJobWorker::new(h.workflow.outbox.clone(), Duration::from_millis(10));
        // Backoff has not elapsed yet.
        assert_eq!(worker.run_once(now()).await.unwrap(), 0);

        h.adapters.parties.set_unavailable(false);
        let later = now() + chrono::Duration::minutes(10);
        assert_eq!(worker.run_once(later).await.unwrap(), 1);

        let job = h.adapters.jobs.get(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt, 2);

        let contract = h
            .workflow
            .outbox
            .generate(ContractTarget::SelfFundedOffer { offer_id: offer.id }, later)
            .await
            .unwrap();
        assert_eq!(contract.offer_id, offer.id);
    }

    #[tokio::test]
    async fn permanent_failures_are_dead_lettered_and_can_be_requeued() {
        let h = Harness::new();
        let (b, s) = (buyer(), seller());
        let (offer, _) = h.accepted_offer(&b, &s).await;

        // Funding type never chosen, so no two-party contract can exist.
        let target = ContractTarget::SelfFundedOffer { offer_id: offer.id };
        let outcome = h.workflow.outbox.generate_or_defer(target, now()).await;
        assert!(matches!(outcome, ContractOutcome::Skipped { .. }));

        let dead = h.workflow.outbox.list_dead_letters(10).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.target, target);

        let requeued = h.workflow.outbox.retry_dead_letter(dead[0].job.id, now()).unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert!(h.workflow.outbox.list_dead_letters(10).unwrap().is_empty());
    }
}
