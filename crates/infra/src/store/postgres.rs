//! Postgres-backed [`WorkflowStore`].
//!
//! Each record lives in its own table as a JSONB `body` next to the handful
//! of columns the workflow filters or constrains on. Reads inside a
//! transaction take `FOR UPDATE` row locks; the uniqueness invariants are
//! partial unique indexes (see `migrations/0001_financing_workflow.sql`).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Conflict` |
//! | Decode | N/A | `Corrupt` |
//! | anything else | N/A | `Backend` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::instrument;
use uuid::Uuid;

use chrono::Datelike;
use scf_financing::{
    Bid, BidId, Contract, ContractId, ContractType, Disbursement, DisbursementId, DiscountOffer,
    Invoice, InvoiceId, OfferId, Repayment, RepaymentId,
};

use super::{InvoiceQuery, StoreError, StoreTx, WorkflowStore};
use crate::ports::{ContractNumbering, PortError, format_contract_number};

const SCHEMA: &str = include_str!("../../migrations/0001_financing_workflow.sql");

#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}

struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

async fn fetch_body<T>(
    conn: &mut PgConnection,
    operation: &str,
    sql: &str,
    key: Uuid,
) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned + Send + Unpin,
{
    let row: Option<Json<T>> = sqlx::query_scalar(sql)
        .bind(key)
        .fetch_optional(conn)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(row.map(|Json(body)| body))
}

async fn fetch_ids(
    conn: &mut PgConnection,
    operation: &str,
    sql: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, StoreError> {
    sqlx::query_scalar(sql)
        .bind(now)
        .fetch_all(conn)
        .await
        .map_err(|e| map_sqlx_error(operation, e))
}

fn ensure_updated(rows_affected: u64, kind: &str, id: impl core::fmt::Display) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::Missing(format!("{kind} {id}")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_invoice",
            "SELECT body FROM invoices WHERE id = $1 FOR UPDATE",
            id.as_uuid(),
        )
        .await
    }

    async fn invoices(&mut self, query: &InvoiceQuery) -> Result<Vec<Invoice>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT body FROM invoices WHERE TRUE");
        if let Some(entity_id) = query.party {
            let entity_id = *entity_id.as_uuid();
            qb.push(" AND (buyer_entity_id = ")
                .push_bind(entity_id)
                .push(" OR seller_entity_id = ")
                .push_bind(entity_id)
                .push(")");
        }
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(financier) = query.bid_by {
            qb.push(" AND id IN (SELECT invoice_id FROM bids WHERE financier_entity_id = ")
                .push_bind(*financier.as_uuid())
                .push(")");
        }
        qb.push(" ORDER BY created_at, id");

        let rows: Vec<Json<Invoice>> = qb
            .build_query_scalar()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_invoices", e))?;
        Ok(rows.into_iter().map(|Json(invoice)| invoice).collect())
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id), err)]
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, status, buyer_entity_id, seller_entity_id, created_at, body)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.status().as_str())
        .bind(invoice.buyer().map(|e| *e.as_uuid()))
        .bind(invoice.seller().map(|e| *e.as_uuid()))
        .bind(invoice.created_at)
        .bind(Json(invoice))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2, buyer_entity_id = $3, seller_entity_id = $4, body = $5
            WHERE id = $1
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.status().as_str())
        .bind(invoice.buyer().map(|e| *e.as_uuid()))
        .bind(invoice.seller().map(|e| *e.as_uuid()))
        .bind(Json(invoice))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_invoice", e))?;
        ensure_updated(result.rows_affected(), "invoice", invoice.id)
    }

    async fn delete_invoice(&mut self, id: InvoiceId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_invoice", e))?;
        ensure_updated(result.rows_affected(), "invoice", id)
    }

    async fn offer(&mut self, id: OfferId) -> Result<Option<DiscountOffer>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_offer",
            "SELECT body FROM discount_offers WHERE id = $1 FOR UPDATE",
            id.as_uuid(),
        )
        .await
    }

    async fn active_offer_for_invoice(
        &mut self,
        invoice_id: InvoiceId,
    ) -> Result<Option<DiscountOffer>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_active_offer",
            "SELECT body FROM discount_offers WHERE invoice_id = $1 AND status <> 'CANCELLED' FOR UPDATE",
            invoice_id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, offer), fields(offer_id = %offer.id, invoice_id = %offer.invoice_id), err)]
    async fn insert_offer(&mut self, offer: &DiscountOffer) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO discount_offers (id, invoice_id, status, expires_at, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(offer.id.as_uuid())
        .bind(offer.invoice_id.as_uuid())
        .bind(offer.status().as_str())
        .bind(offer.expires_at)
        .bind(Json(offer))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_offer", e))?;
        Ok(())
    }

    async fn update_offer(&mut self, offer: &DiscountOffer) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE discount_offers SET status = $2, expires_at = $3, body = $4 WHERE id = $1",
        )
        .bind(offer.id.as_uuid())
        .bind(offer.status().as_str())
        .bind(offer.expires_at)
        .bind(Json(offer))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_offer", e))?;
        ensure_updated(result.rows_affected(), "discount offer", offer.id)
    }

    async fn expired_offer_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<OfferId>, StoreError> {
        let ids = fetch_ids(
            &mut *self.tx,
            "expired_offers",
            "SELECT id FROM discount_offers WHERE status = 'PENDING' AND expires_at < $1 ORDER BY expires_at, id",
            now,
        )
        .await?;
        Ok(ids.into_iter().map(OfferId::from).collect())
    }

    async fn bid(&mut self, id: BidId) -> Result<Option<Bid>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_bid",
            "SELECT body FROM bids WHERE id = $1 FOR UPDATE",
            id.as_uuid(),
        )
        .await
    }

    async fn bids_for_invoice(&mut self, invoice_id: InvoiceId) -> Result<Vec<Bid>, StoreError> {
        let rows: Vec<Json<Bid>> = sqlx::query_scalar(
            "SELECT body FROM bids WHERE invoice_id = $1 ORDER BY created_at, id FOR UPDATE",
        )
        .bind(invoice_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_bids", e))?;
        Ok(rows.into_iter().map(|Json(bid)| bid).collect())
    }

    #[instrument(skip(self, bid), fields(bid_id = %bid.id, invoice_id = %bid.invoice_id), err)]
    async fn insert_bid(&mut self, bid: &Bid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bids (id, invoice_id, financier_entity_id, status, valid_until, created_at, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(bid.id.as_uuid())
        .bind(bid.invoice_id.as_uuid())
        .bind(*bid.financier.as_uuid())
        .bind(bid.status().as_str())
        .bind(bid.valid_until)
        .bind(bid.created_at)
        .bind(Json(bid))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_bid", e))?;
        Ok(())
    }

    async fn update_bid(&mut self, bid: &Bid) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE bids SET status = $2, valid_until = $3, body = $4 WHERE id = $1")
                .bind(bid.id.as_uuid())
                .bind(bid.status().as_str())
                .bind(bid.valid_until)
                .bind(Json(bid))
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("update_bid", e))?;
        ensure_updated(result.rows_affected(), "bid", bid.id)
    }

    async fn expired_bid_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<BidId>, StoreError> {
        let ids = fetch_ids(
            &mut *self.tx,
            "expired_bids",
            "SELECT id FROM bids WHERE status = 'PENDING' AND valid_until < $1 ORDER BY valid_until, id",
            now,
        )
        .await?;
        Ok(ids.into_iter().map(BidId::from).collect())
    }

    async fn disbursement(&mut self, id: DisbursementId) -> Result<Option<Disbursement>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_disbursement",
            "SELECT body FROM disbursements WHERE id = $1 FOR UPDATE",
            id.as_uuid(),
        )
        .await
    }

    async fn disbursement_for_invoice(
        &mut self,
        invoice_id: InvoiceId,
    ) -> Result<Option<Disbursement>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_invoice_disbursement",
            "SELECT body FROM disbursements WHERE invoice_id = $1 FOR UPDATE",
            invoice_id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, disbursement), fields(disbursement_id = %disbursement.id), err)]
    async fn insert_disbursement(&mut self, disbursement: &Disbursement) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO disbursements (id, invoice_id, status, body) VALUES ($1, $2, $3, $4)",
        )
        .bind(disbursement.id.as_uuid())
        .bind(disbursement.invoice_id.as_uuid())
        .bind(disbursement.status().as_str())
        .bind(Json(disbursement))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_disbursement", e))?;
        Ok(())
    }

    async fn update_disbursement(&mut self, disbursement: &Disbursement) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE disbursements SET status = $2, body = $3 WHERE id = $1")
            .bind(disbursement.id.as_uuid())
            .bind(disbursement.status().as_str())
            .bind(Json(disbursement))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_disbursement", e))?;
        ensure_updated(result.rows_affected(), "disbursement", disbursement.id)
    }

    async fn repayment(&mut self, id: RepaymentId) -> Result<Option<Repayment>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_repayment",
            "SELECT body FROM repayments WHERE id = $1 FOR UPDATE",
            id.as_uuid(),
        )
        .await
    }

    async fn repayment_for_disbursement(
        &mut self,
        disbursement_id: DisbursementId,
    ) -> Result<Option<Repayment>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_disbursement_repayment",
            "SELECT body FROM repayments WHERE disbursement_id = $1 FOR UPDATE",
            disbursement_id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, repayment), fields(repayment_id = %repayment.id), err)]
    async fn insert_repayment(&mut self, repayment: &Repayment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO repayments (id, disbursement_id, status, due_date, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(repayment.id.as_uuid())
        .bind(repayment.disbursement_id.as_uuid())
        .bind(repayment.status().as_str())
        .bind(repayment.due_date)
        .bind(Json(repayment))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_repayment", e))?;
        Ok(())
    }

    async fn update_repayment(&mut self, repayment: &Repayment) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE repayments SET status = $2, body = $3 WHERE id = $1")
            .bind(repayment.id.as_uuid())
            .bind(repayment.status().as_str())
            .bind(Json(repayment))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_repayment", e))?;
        ensure_updated(result.rows_affected(), "repayment", repayment.id)
    }

    async fn overdue_repayment_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<RepaymentId>, StoreError> {
        let ids = fetch_ids(
            &mut *self.tx,
            "overdue_repayments",
            "SELECT id FROM repayments WHERE status = 'PENDING' AND due_date < $1 ORDER BY due_date, id",
            now,
        )
        .await?;
        Ok(ids.into_iter().map(RepaymentId::from).collect())
    }

    async fn contract(&mut self, id: ContractId) -> Result<Option<Contract>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_contract",
            "SELECT body FROM contracts WHERE id = $1",
            id.as_uuid(),
        )
        .await
    }

    async fn contract_for_offer(&mut self, offer_id: OfferId) -> Result<Option<Contract>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_offer_contract",
            "SELECT body FROM contracts WHERE offer_id = $1 AND bid_id IS NULL",
            offer_id.as_uuid(),
        )
        .await
    }

    async fn contract_for_bid(&mut self, bid_id: BidId) -> Result<Option<Contract>, StoreError> {
        fetch_body(
            &mut *self.tx,
            "load_bid_contract",
            "SELECT body FROM contracts WHERE bid_id = $1",
            bid_id.as_uuid(),
        )
        .await
    }

    #[instrument(
        skip(self, contract),
        fields(contract_id = %contract.id, contract_number = %contract.contract_number),
        err
    )]
    async fn insert_contract(&mut self, contract: &Contract) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO contracts (id, contract_number, invoice_id, offer_id, bid_id, contract_type, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(contract.id.as_uuid())
        .bind(&contract.contract_number)
        .bind(contract.invoice_id.as_uuid())
        .bind(contract.offer_id.as_uuid())
        .bind(contract.bid_id.map(|b| b.as_uuid()))
        .bind(contract.contract_type().as_str())
        .bind(Json(contract))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_contract", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

/// Contract numbers backed by a per-(type, year) counter row, so numbering
/// survives restarts and is shared by every node.
#[derive(Debug, Clone)]
pub struct PgContractNumbering {
    pool: PgPool,
}

impl PgContractNumbering {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContractNumbering for PgContractNumbering {
    #[instrument(skip(self), err)]
    async fn next_number(
        &self,
        contract_type: ContractType,
        at: DateTime<Utc>,
    ) -> Result<String, PortError> {
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO contract_number_counters (contract_type, year, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (contract_type, year)
            DO UPDATE SET last_value = contract_number_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(contract_type.as_str())
        .bind(at.year())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unavailable(format!("contract numbering: {e}")))?;

        let sequence = u64::try_from(sequence)
            .map_err(|_| PortError::Unavailable(format!("negative contract sequence {sequence}")))?;
        Ok(format_contract_number(contract_type, at, sequence))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::Decode(e) | sqlx::Error::ColumnDecode { source: e, .. } => {
            StoreError::Corrupt(format!("{operation}: {e}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}
