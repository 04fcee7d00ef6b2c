//! Disbursements and financier repayments.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use scf_core::EntityId;
use scf_financing::{
    Actor, AuditChange, AuditRecord, BidId, Disbursement, DisbursementId, DisbursementSource,
    DisbursementStatus, Invoice, InvoiceId, InvoiceStatus, Notification, NotificationKind,
    Recipient, Repayment, RepaymentId, RepaymentStatus, Side, Subject,
};

use super::{WorkflowContext, audit_invoice_status, load_invoice, notify_party, recipient};
use crate::effects::Effects;
use crate::error::{WorkflowError, WorkflowResult};
use crate::store::StoreTx;
use crate::sweeps::SweepReport;

/// A financier-funded disbursement and the repayment it created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinancedDisbursement {
    pub disbursement: Disbursement,
    pub repayment: Repayment,
    pub invoice: Invoice,
}

/// An invoice's disbursement, with its repayment on the financier path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisbursementView {
    pub disbursement: Disbursement,
    pub repayment: Option<Repayment>,
}

#[derive(Clone)]
pub struct DisbursementLedger {
    ctx: Arc<WorkflowContext>,
}

async fn load_repayment(tx: &mut Box<dyn StoreTx>, id: RepaymentId) -> WorkflowResult<Repayment> {
    tx.repayment(id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("repayment", id))
}

/// Recipient for any entity on the invoice; entities off the invoice are financiers.
fn entity_recipient(invoice: &Invoice, entity_id: EntityId) -> Recipient {
    match invoice.side_of(entity_id) {
        Some(side) => recipient(side, entity_id),
        None => Recipient::financier(entity_id),
    }
}

#[allow(clippy::too_many_arguments)]
fn notify_entity(
    effects: &mut Effects,
    invoice: &Invoice,
    entity_id: EntityId,
    kind: NotificationKind,
    title: &str,
    message: String,
    subject: Subject,
    now: DateTime<Utc>,
) {
    effects.notify(Notification::new(
        entity_recipient(invoice, entity_id),
        kind,
        title,
        message,
        invoice.id,
        subject,
        now,
    ));
}

fn audit_repayment_status(
    effects: &mut Effects,
    actor: Option<&Actor>,
    action: &str,
    repayment: &Repayment,
    from: RepaymentStatus,
    now: DateTime<Utc>,
) {
    effects.audit(AuditRecord::new(
        actor.map(Actor::user_id),
        action,
        repayment,
        AuditChange::RepaymentStatus {
            from,
            to: repayment.status(),
        },
        now,
    ));
}

impl DisbursementLedger {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    /// The winning financier funds the invoice. Disbursement, repayment and
    /// the invoice transition commit together.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn disburse_bid(
        &self,
        actor: &Actor,
        bid_id: BidId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<FinancedDisbursement> {
        let financier = *actor.require_financier()?;

        let mut tx = self.ctx.store.begin().await?;
        let bid = tx
            .bid(bid_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("bid", bid_id))?;
        bid.ensure_owner(&financier)?;
        let mut invoice = load_invoice(&mut tx, bid.invoice_id).await?;
        if let Some(existing) = tx.disbursement_for_invoice(invoice.id).await? {
            return Err(WorkflowError::Conflict(format!(
                "invoice {} already has disbursement {}",
                invoice.id, existing.id
            )));
        }

        let disbursement = Disbursement::financier_funded(DisbursementId::generate(), &invoice, &bid, now)?;
        let repayment = Repayment::for_disbursement(RepaymentId::generate(), &invoice, &disbursement, now)?;
        let from = invoice.transition_to(InvoiceStatus::Disbursed, now)?;

        tx.insert_disbursement(&disbursement).await?;
        tx.insert_repayment(&repayment).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "disbursement.create",
            &disbursement,
            AuditChange::Created,
            now,
        ));
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "repayment.create",
            &repayment,
            AuditChange::Created,
            now,
        ));
        audit_invoice_status(&mut effects, Some(actor), "bid.disburse", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            Side::Seller,
            NotificationKind::DisbursementCreated,
            "Financing disbursed",
            format!(
                "{} {} is on its way for invoice {}",
                disbursement.amount, invoice.currency, invoice.invoice_number
            ),
            Subject::Disbursement(disbursement.id),
            now,
        );
        notify_entity(
            &mut effects,
            &invoice,
            repayment.payer,
            NotificationKind::DisbursementCreated,
            "Repayment scheduled",
            format!(
                "Repay {} {} to the financier by {} for invoice {}",
                repayment.amount,
                invoice.currency,
                repayment.due_date.format("%Y-%m-%d"),
                invoice.invoice_number
            ),
            Subject::Repayment(repayment.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;

        info!(%bid_id, disbursement_id = %disbursement.id, repayment_id = %repayment.id, "financier disbursement created");
        Ok(FinancedDisbursement {
            disbursement,
            repayment,
            invoice,
        })
    }

    /// Payment-confirmation progress: PENDING → PROCESSING → COMPLETED | FAILED.
    /// A completed self-funded disbursement settles its invoice.
    #[instrument(skip(self, actor, reference, reason), fields(user_id = %actor.user_id()), err)]
    pub async fn advance_disbursement(
        &self,
        actor: &Actor,
        disbursement_id: DisbursementId,
        next: DisbursementStatus,
        reference: Option<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Disbursement> {
        actor.require_admin()?;

        let mut tx = self.ctx.store.begin().await?;
        let mut disbursement = tx
            .disbursement(disbursement_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("disbursement", disbursement_id))?;
        let mut invoice = load_invoice(&mut tx, disbursement.invoice_id).await?;

        let from = disbursement.advance(next, reference, reason, now)?;
        let invoice_from = invoice.status();
        let settles = next == DisbursementStatus::Completed
            && matches!(disbursement.source, DisbursementSource::SelfFunded { .. });
        if settles {
            invoice.transition_to(InvoiceStatus::Settled, now)?;
            tx.update_invoice(&invoice).await?;
        }
        tx.update_disbursement(&disbursement).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "disbursement.advance",
            &disbursement,
            AuditChange::DisbursementStatus { from, to: next },
            now,
        ));
        audit_invoice_status(&mut effects, Some(actor), "disbursement.advance", &invoice, invoice_from, now);

        let notice = match next {
            DisbursementStatus::Completed => Some((
                NotificationKind::DisbursementCompleted,
                "Disbursement completed",
                format!(
                    "{} {} for invoice {} has been paid",
                    disbursement.amount, invoice.currency, invoice.invoice_number
                ),
            )),
            DisbursementStatus::Failed => Some((
                NotificationKind::DisbursementFailed,
                "Disbursement failed",
                format!(
                    "Payment for invoice {} failed: {}",
                    invoice.invoice_number,
                    disbursement.failure_reason.as_deref().unwrap_or("unknown reason")
                ),
            )),
            DisbursementStatus::Pending | DisbursementStatus::Processing => None,
        };
        if let Some((kind, title, message)) = notice {
            for entity_id in [disbursement.payer, disbursement.recipient] {
                notify_entity(
                    &mut effects,
                    &invoice,
                    entity_id,
                    kind,
                    title,
                    message.clone(),
                    Subject::Disbursement(disbursement.id),
                    now,
                );
            }
        }
        self.ctx.effects.dispatch(effects).await;
        Ok(disbursement)
    }

    /// Visible to admins, the invoice's parties and the paying financier.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn disbursement_for_invoice(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
    ) -> WorkflowResult<DisbursementView> {
        let mut tx = self.ctx.store.begin().await?;
        let invoice = load_invoice(&mut tx, invoice_id).await?;
        let disbursement = tx.disbursement_for_invoice(invoice_id).await?;

        let visible = match actor {
            Actor::Admin { .. } => true,
            Actor::Buyer(_) | Actor::Seller(_) => invoice.is_linked_party(actor),
            Actor::Financier(p) => disbursement
                .as_ref()
                .is_some_and(|d| d.financier() == Some(p.entity_id)),
        };
        let disbursement = match disbursement {
            Some(d) if visible => d,
            _ => {
                return Err(WorkflowError::NotFound(format!(
                    "no disbursement for invoice {invoice_id}"
                )));
            }
        };

        let repayment = tx.repayment_for_disbursement(disbursement.id).await?;
        Ok(DisbursementView {
            disbursement,
            repayment,
        })
    }

    /// Record repayment to the financier; the invoice is settled.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn mark_repayment_paid(
        &self,
        actor: &Actor,
        repayment_id: RepaymentId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Repayment> {
        let mut tx = self.ctx.store.begin().await?;
        let mut repayment = load_repayment(&mut tx, repayment_id).await?;

        let allowed = match actor {
            Actor::Admin { .. } => true,
            Actor::Financier(p) => p.entity_id == repayment.payee,
            Actor::Buyer(_) | Actor::Seller(_) => false,
        };
        if !allowed {
            return Err(WorkflowError::Forbidden(format!(
                "only an admin or the funding financier may confirm repayment {repayment_id}"
            )));
        }

        let mut invoice = load_invoice(&mut tx, repayment.invoice_id).await?;
        let from = repayment.mark_paid(now)?;
        let invoice_from = invoice.transition_to(InvoiceStatus::Settled, now)?;

        tx.update_repayment(&repayment).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_repayment_status(&mut effects, Some(actor), "repayment.paid", &repayment, from, now);
        audit_invoice_status(&mut effects, Some(actor), "repayment.paid", &invoice, invoice_from, now);
        notify_entity(
            &mut effects,
            &invoice,
            repayment.payer,
            NotificationKind::RepaymentPaid,
            "Repayment received",
            format!("Repayment for invoice {} was received; the invoice is settled", invoice.invoice_number),
            Subject::Repayment(repayment.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;

        info!(%repayment_id, invoice_id = %invoice.id, "repayment paid; invoice settled");
        Ok(repayment)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn mark_repayment_defaulted(
        &self,
        actor: &Actor,
        repayment_id: RepaymentId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Repayment> {
        actor.require_admin()?;

        let mut tx = self.ctx.store.begin().await?;
        let mut repayment = load_repayment(&mut tx, repayment_id).await?;
        let invoice = load_invoice(&mut tx, repayment.invoice_id).await?;

        let from = repayment.status();
        repayment.mark_defaulted(now)?;
        tx.update_repayment(&repayment).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_repayment_status(&mut effects, Some(actor), "repayment.default", &repayment, from, now);
        for entity_id in [repayment.payer, repayment.payee] {
            notify_entity(
                &mut effects,
                &invoice,
                entity_id,
                NotificationKind::RepaymentDefaulted,
                "Repayment defaulted",
                format!("Repayment for invoice {} is in default", invoice.invoice_number),
                Subject::Repayment(repayment.id),
                now,
            );
        }
        self.ctx.effects.dispatch(effects).await;

        warn!(%repayment_id, invoice_id = %invoice.id, "repayment defaulted");
        Ok(repayment)
    }

    /// Mark PENDING repayments past their due date OVERDUE. Re-running is a no-op.
    #[instrument(skip(self))]
    pub async fn sweep_overdue(&self, now: DateTime<Utc>) -> WorkflowResult<SweepReport> {
        let candidates = {
            let mut tx = self.ctx.store.begin().await?;
            tx.overdue_repayment_ids(now).await?
        };

        let mut report = SweepReport::default();
        for repayment_id in candidates {
            report.examined += 1;
            match self.mark_overdue(repayment_id, now).await {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(err) => warn!(%repayment_id, error = %err, "overdue marking failed; will retry next sweep"),
            }
        }

        if report.updated > 0 {
            info!(examined = report.examined, updated = report.updated, "marked repayments overdue");
        }
        Ok(report)
    }

    async fn mark_overdue(&self, repayment_id: RepaymentId, now: DateTime<Utc>) -> WorkflowResult<bool> {
        let mut tx = self.ctx.store.begin().await?;
        let mut repayment = load_repayment(&mut tx, repayment_id).await?;
        let from = repayment.status();
        if !repayment.mark_overdue(now) {
            return Ok(false);
        }
        let invoice = load_invoice(&mut tx, repayment.invoice_id).await?;
        tx.update_repayment(&repayment).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_repayment_status(&mut effects, None, "repayment.overdue", &repayment, from, now);
        for entity_id in [repayment.payer, repayment.payee] {
            notify_entity(
                &mut effects,
                &invoice,
                entity_id,
                NotificationKind::RepaymentOverdue,
                "Repayment overdue",
                format!(
                    "Repayment of {} {} for invoice {} was due {}",
                    repayment.amount,
                    invoice.currency,
                    invoice.invoice_number,
                    repayment.due_date.format("%Y-%m-%d")
                ),
                Subject::Repayment(repayment.id),
                now,
            );
        }
        self.ctx.effects.dispatch(effects).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, admin, buyer, financier, now, seller};
    use chrono::Duration;

    #[tokio::test]
    async fn financier_funding_creates_exactly_one_repayment_paid_by_the_seller_on_gst() {
        let h = Harness::new();
        let (b, s, f) = (buyer(), seller(), financier());
        let bid = h.selected_gst_bid(&b, &s, &f).await;

        let funded = h.workflow.ledger.disburse_bid(&Actor::Financier(f), bid.id, now()).await.unwrap();
        assert_eq!(funded.invoice.status(), InvoiceStatus::Disbursed);
        assert_eq!(funded.disbursement.amount, bid.net_amount);
        assert_eq!(funded.repayment.payer, s.entity_id);
        assert_eq!(funded.repayment.payee, f.entity_id);
        assert_eq!(funded.repayment.amount, funded.invoice.total_amount);

        let err = h
            .workflow
            .ledger
            .disburse_bid(&Actor::Financier(f), bid.id, now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_) | WorkflowError::InvalidState(_)));
    }

    #[tokio::test]
    async fn repayment_settles_the_invoice_once() {
        let h = Harness::new();
        let (b, s, f) = (buyer(), seller(), financier());
        let bid = h.selected_gst_bid(&b, &s, &f).await;
        let funded = h.workflow.ledger.disburse_bid(&Actor::Financier(f), bid.id, now()).await.unwrap();

        let err = h
            .workflow
            .ledger
            .mark_repayment_paid(&Actor::Seller(s), funded.repayment.id, now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));

        let paid = h
            .workflow
            .ledger
            .mark_repayment_paid(&Actor::Financier(f), funded.repayment.id, now())
            .await
            .unwrap();
        assert_eq!(paid.status(), RepaymentStatus::Paid);

        let err = h
            .workflow
            .ledger
            .mark_repayment_paid(&admin(), funded.repayment.id, now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));

        let invoice = h.workflow.lifecycle.get(&Actor::Seller(s), bid.invoice_id).await.unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Settled);
    }

    #[tokio::test]
    async fn overdue_sweep_runs_once_then_default_needs_an_admin() {
        let h = Harness::new();
        let (b, s, f) = (buyer(), seller(), financier());
        let bid = h.selected_gst_bid(&b, &s, &f).await;
        let funded = h.workflow.ledger.disburse_bid(&Actor::Financier(f), bid.id, now()).await.unwrap();

        let late = funded.repayment.due_date + Duration::days(1);
        let first = h.workflow.ledger.sweep_overdue(late).await.unwrap();
        let second = h.workflow.ledger.sweep_overdue(late).await.unwrap();
        assert_eq!(first, SweepReport { examined: 1, updated: 1 });
        assert_eq!(second, SweepReport { examined: 0, updated: 0 });

        let err = h
            .workflow
            .ledger
            .mark_repayment_defaulted(&Actor::Financier(f), funded.repayment.id, late)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
        let defaulted = h
            .workflow
            .ledger
            .mark_repayment_defaulted(&admin(), funded.repayment.id, late)
            .await
            .unwrap();
        assert_eq!(defaulted.status(), RepaymentStatus::Defaulted);
    }

    #[tokio::test]
    async fn disbursement_progress_is_admin_only_and_ordered() {
        let h = Harness::new();
        let (b, s, f) = (buyer(), seller(), financier());
        let bid = h.selected_gst_bid(&b, &s, &f).await;
        let funded = h.workflow.ledger.disburse_bid(&Actor::Financier(f), bid.id, now()).await.unwrap();
        let id = funded.disbursement.id;
        let ledger = &h.workflow.ledger;

        let err = ledger
            .advance_disbursement(&Actor::Financier(f), id, DisbursementStatus::Processing, None, None, now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));

        let err = ledger
            .advance_disbursement(&admin(), id, DisbursementStatus::Completed, None, None, now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));

        ledger
            .advance_disbursement(&admin(), id, DisbursementStatus::Processing, Some("UTR-1".into()), None, now())
            .await
            .unwrap();
        let done = ledger
            .advance_disbursement(&admin(), id, DisbursementStatus::Completed, None, None, now())
            .await
            .unwrap();
        assert_eq!(done.status(), DisbursementStatus::Completed);
        assert_eq!(done.payment_reference.as_deref(), Some("UTR-1"));

        let completed = h.adapters.notifications.sent_to(Recipient::financier(f.entity_id));
        assert!(completed.iter().any(|n| n.kind == NotificationKind::DisbursementCompleted));

        let view = ledger.disbursement_for_invoice(&Actor::Seller(s), bid.invoice_id).await.unwrap();
        assert_eq!(view.repayment.map(|r| r.id), Some(funded.repayment.id));
        assert!(
            ledger
                .disbursement_for_invoice(&Actor::Financier(financier()), bid.invoice_id)
                .await
                .is_err()
        );
    }
}
