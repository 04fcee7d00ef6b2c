//! Contract generation and the contract outbox.
//!
//! Generation is idempotent per offer (two-party) and per bid (three-party):
//! a second call, or the loser of two concurrent calls, gets the contract that
//! already exists. Callers that must not fail on contract problems go through
//! [`ContractOutbox::generate_or_defer`], which turns failures into a
//! [`ContractOutcome`] and a retry job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use scf_financing::{
    Actor, AuditChange, AuditRecord, BidId, Contract, ContractId, ContractType, Invoice,
    Notification, NotificationKind, OfferId, Recipient, Side, Subject,
};

use super::{WorkflowContext, load_invoice, notify_party};
use crate::effects::Effects;
use crate::error::{WorkflowError, WorkflowResult};
use crate::jobs::{ContractTarget, DeadLetterEntry, Job, JobId, JobStore, RetryPolicy};
use crate::ports::RenderedDocument;
use crate::store::{StoreError, StoreTx};

#[derive(Clone)]
pub struct ContractGenerator {
    ctx: Arc<WorkflowContext>,
}

fn generated_effects(contract: &Contract, invoice: &Invoice, now: DateTime<Utc>) -> Effects {
    let mut effects = Effects::new();
    effects.audit(AuditRecord::new(
        None,
        "contract.generate",
        contract,
        AuditChange::Created,
        now,
    ));

    let message = format!(
        "Contract {} was generated for invoice {}",
        contract.contract_number, invoice.invoice_number
    );
    for side in [Side::Buyer, Side::Seller] {
        notify_party(
            &mut effects,
            invoice,
            side,
            NotificationKind::ContractGenerated,
            "Contract generated",
            message.clone(),
            Subject::Contract(contract.id),
            now,
        );
    }
    if let Some(financier) = &contract.financier {
        effects.notify(Notification::new(
            Recipient::financier(financier.entity_id),
            NotificationKind::ContractGenerated,
            "Contract generated",
            message,
            invoice.id,
            Subject::Contract(contract.id),
            now,
        ));
    }
    effects
}

impl ContractGenerator {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    /// Two-party contract for an accepted self-funded offer.
    #[instrument(skip(self), err)]
    pub async fn generate_two_party(
        &self,
        offer_id: OfferId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Contract> {
        let mut tx = self.ctx.store.begin().await?;
        if let Some(existing) = tx.contract_for_offer(offer_id).await? {
            return Ok(existing);
        }

        let offer = tx
            .offer(offer_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("offer", offer_id))?;
        let invoice = load_invoice(&mut tx, offer.invoice_id).await?;
        let buyer = self.ctx.parties.profile(invoice.require_buyer()?).await?;
        let seller = self.ctx.parties.profile(invoice.require_seller()?).await?;
        let number = self.ctx.numbering.next_number(ContractType::TwoParty, now).await?;

        let contract = Contract::two_party(
            ContractId::generate(),
            number,
            &invoice,
            &offer,
            buyer,
            seller,
            now,
        )?;

        match tx.insert_contract(&contract).await {
            Ok(()) => tx.commit().await?,
            Err(StoreError::Conflict(reason)) => {
                drop(tx);
                let mut tx = self.ctx.store.begin().await?;
                return tx
                    .contract_for_offer(offer_id)
                    .await?
                    .ok_or(WorkflowError::Conflict(reason));
            }
            Err(err) => return Err(err.into()),
        }

        self.ctx
            .effects
            .dispatch(generated_effects(&contract, &invoice, now))
            .await;
        info!(contract_id = %contract.id, contract_number = %contract.contract_number, "two-party contract generated");
        Ok(contract)
    }

    /// Three-party contract for an accepted bid. The invoice must carry a
    /// discount offer; the contract references it.
    #[instrument(skip(self), err)]
    pub async fn generate_three_party(
        &self,
        bid_id: BidId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Contract> {
        let mut tx = self.ctx.store.begin().await?;
        if let Some(existing) = tx.contract_for_bid(bid_id).await? {
            return Ok(existing);
        }

        let bid = tx
            .bid(bid_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("bid", bid_id))?;
        let invoice = load_invoice(&mut tx, bid.invoice_id).await?;
        let offer = tx.active_offer_for_invoice(invoice.id).await?.ok_or_else(|| {
            WorkflowError::Validation(format!(
                "invoice {} has no discount offer to base a three-party contract on",
                invoice.id
            ))
        })?;

        let buyer = self.ctx.parties.profile(invoice.require_buyer()?).await?;
        let seller = self.ctx.parties.profile(invoice.require_seller()?).await?;
        let financier = self.ctx.parties.profile(bid.financier).await?;
        let number = self.ctx.numbering.next_number(ContractType::ThreeParty, now).await?;

        let contract = Contract::three_party(
            ContractId::generate(),
            number,
            &invoice,
            &offer,
            &bid,
            buyer,
            seller,
            financier,
            now,
        )?;

        match tx.insert_contract(&contract).await {
            Ok(()) => tx.commit().await?,
            Err(StoreError::Conflict(reason)) => {
                drop(tx);
                let mut tx = self.ctx.store.begin().await?;
                return tx
                    .contract_for_bid(bid_id)
                    .await?
                    .ok_or(WorkflowError::Conflict(reason));
            }
            Err(err) => return Err(err.into()),
        }

        self.ctx
            .effects
            .dispatch(generated_effects(&contract, &invoice, now))
            .await;
        info!(contract_id = %contract.id, contract_number = %contract.contract_number, "three-party contract generated");
        Ok(contract)
    }

    /// Contracts are visible to the parties named on them and to admins.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn get_contract(&self, actor: &Actor, contract_id: ContractId) -> WorkflowResult<Contract> {
        let mut tx = self.ctx.store.begin().await?;
        let contract = tx
            .contract(contract_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("contract", contract_id))?;

        let visible = match actor.entity_id() {
            None => actor.is_admin(),
            Some(entity_id) => {
                contract.buyer.entity_id == entity_id
                    || contract.seller.entity_id == entity_id
                    || contract.financier.as_ref().is_some_and(|f| f.entity_id == entity_id)
            }
        };
        if visible {
            Ok(contract)
        } else {
            Err(WorkflowError::not_found("contract", contract_id))
        }
    }

    pub async fn render_document(
        &self,
        actor: &Actor,
        contract_id: ContractId,
    ) -> WorkflowResult<RenderedDocument> {
        let contract = self.get_contract(actor, contract_id).await?;
        Ok(self.ctx.renderer.render(&contract)?)
    }
}

/// What happened to the contract an operation asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContractOutcome {
    Generated {
        contract_id: ContractId,
        contract_number: String,
    },
    /// Generation failed transiently and will be retried by the worker.
    Deferred { job_id: JobId, reason: String },
    /// Generation cannot succeed without operator action.
    Skipped { reason: String },
}

#[derive(Clone)]
pub struct ContractOutbox {
    generator: ContractGenerator,
    jobs: Arc<dyn JobStore>,
    policy: RetryPolicy,
}

impl ContractOutbox {
    pub fn new(generator: ContractGenerator, jobs: Arc<dyn JobStore>, policy: RetryPolicy) -> Self {
        Self {
            generator,
            jobs,
            policy,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub async fn generate(&self, target: ContractTarget, now: DateTime<Utc>) -> WorkflowResult<Contract> {
        match target {
            ContractTarget::SelfFundedOffer { offer_id } => {
                self.generator.generate_two_party(offer_id, now).await
            }
            ContractTarget::AcceptedBid { bid_id } => {
                self.generator.generate_three_party(bid_id, now).await
            }
        }
    }

    /// Attempt generation inline. Never fails: transient errors become a
    /// retry job, permanent ones a dead letter.
    pub async fn generate_or_defer(&self, target: ContractTarget, now: DateTime<Utc>) -> ContractOutcome {
        let err = match self.generate(target, now).await {
            Ok(contract) => {
                return ContractOutcome::Generated {
                    contract_id: contract.id,
                    contract_number: contract.contract_number,
                };
            }
            Err(err) => err,
        };

        let reason = err.to_string();
        let job = Job::deferred(target, self.policy.clone(), reason.clone(), now);
        let job_id = job.id;

        if err.is_transient() && !job.status.is_terminal() {
            warn!(%target, %job_id, error = %err, "contract generation deferred");
            return match self.jobs.enqueue(job) {
                Ok(_) => ContractOutcome::Deferred { job_id, reason },
                Err(store_err) => {
                    error!(%target, error = %store_err, "could not enqueue contract job");
                    ContractOutcome::Skipped { reason }
                }
            };
        }

        error!(%target, %job_id, error = %err, "contract generation failed permanently");
        if let Err(store_err) = self.jobs.dead_letter(job, reason.clone(), now) {
            error!(%target, error = %store_err, "could not dead-letter contract job");
        }
        ContractOutcome::Skipped { reason }
    }

    /// Run one claimed job to completion, retry or dead letter.
    #[instrument(skip(self, job), fields(job_id = %job.id, target = %job.target, attempt = job.attempt))]
    pub async fn run_job(&self, mut job: Job, now: DateTime<Utc>) -> WorkflowResult<()> {
        match self.generate(job.target, now).await {
            Ok(contract) => {
                job.mark_completed(now, now);
                self.jobs.update(&job)?;
                info!(contract_id = %contract.id, "deferred contract generated");
            }
            Err(err) if err.is_transient() => {
                job.mark_failed(err.to_string(), now, now);
                if job.status.is_terminal() {
                    warn!(error = %err, "contract job exhausted its retries");
                    self.jobs.dead_letter(job, err.to_string(), now)?;
                } else {
                    warn!(error = %err, scheduled_at = ?job.scheduled_at, "contract job will retry");
                    self.jobs.update(&job)?;
                }
            }
            Err(err) => {
                error!(error = %err, "contract job cannot succeed");
                self.jobs.dead_letter(job, err.to_string(), now)?;
            }
        }
        Ok(())
    }

    pub fn list_dead_letters(&self, limit: usize) -> WorkflowResult<Vec<DeadLetterEntry>> {
        Ok(self.jobs.list_dead_letters(limit)?)
    }

    pub fn retry_dead_letter(&self, job_id: JobId, now: DateTime<Utc>) -> WorkflowResult<Job> {
        Ok(self.jobs.retry_dead_letter(job_id, now)?)
    }
}
