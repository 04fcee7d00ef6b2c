//! In-process port adapters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tracing::info;

use scf_core::EntityId;
use scf_financing::{
    AuditRecord, BankAccountId, Contract, ContractType, Notification, PartyProfile, Recipient,
    render_contract,
};

use super::{
    AuditSink, BankAccounts, ContractDocumentRenderer, ContractNumbering, KycDirectory, KycStatus,
    NotificationSink, PartyDirectory, PortError, RenderedDocument, format_contract_number,
};

fn poisoned<T>(_: PoisonError<T>) -> PortError {
    PortError::Unavailable("adapter lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryKycDirectory {
    statuses: RwLock<HashMap<EntityId, KycStatus>>,
}

impl InMemoryKycDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, entity_id: EntityId, status: KycStatus) {
        if let Ok(mut statuses) = self.statuses.write() {
            statuses.insert(entity_id, status);
        }
    }
}

#[async_trait]
impl KycDirectory for InMemoryKycDirectory {
    async fn status(&self, entity_id: EntityId) -> Result<KycStatus, PortError> {
        let statuses = self.statuses.read().map_err(poisoned)?;
        Ok(statuses.get(&entity_id).copied().unwrap_or(KycStatus::NotStarted))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBankAccounts {
    owners: RwLock<HashMap<BankAccountId, EntityId>>,
}

impl InMemoryBankAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account_id: BankAccountId, owner: EntityId) {
        if let Ok(mut owners) = self.owners.write() {
            owners.insert(account_id, owner);
        }
    }
}

#[async_trait]
impl BankAccounts for InMemoryBankAccounts {
    async fn is_owned_by(
        &self,
        account_id: BankAccountId,
        entity_id: EntityId,
    ) -> Result<bool, PortError> {
        let owners = self.owners.read().map_err(poisoned)?;
        Ok(owners.get(&account_id) == Some(&entity_id))
    }
}

/// Per-process counters keyed by contract type and year.
#[derive(Debug, Default)]
pub struct SequentialContractNumbering {
    counters: Mutex<HashMap<(ContractType, i32), u64>>,
}

impl SequentialContractNumbering {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContractNumbering for SequentialContractNumbering {
    async fn next_number(
        &self,
        contract_type: ContractType,
        at: DateTime<Utc>,
    ) -> Result<String, PortError> {
        let mut counters = self.counters.lock().map_err(poisoned)?;
        let counter = counters.entry((contract_type, at.year())).or_insert(0);
        *counter += 1;
        Ok(format_contract_number(contract_type, at, *counter))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPartyDirectory {
    profiles: RwLock<HashMap<EntityId, PartyProfile>>,
    outage: AtomicBool,
}

impl InMemoryPartyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, profile: PartyProfile) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(profile.entity_id, profile);
        }
    }

    /// Simulate the directory being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.outage.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PartyDirectory for InMemoryPartyDirectory {
    async fn profile(&self, entity_id: EntityId) -> Result<PartyProfile, PortError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("party directory is offline".to_string()));
        }
        let profiles = self.profiles.read().map_err(poisoned)?;
        profiles
            .get(&entity_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("party profile for entity {entity_id}")))
    }
}

/// Keeps every record and mirrors it to the `audit` tracing target.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), PortError> {
        info!(
            target: "audit",
            action = %record.action,
            entity_type = %record.entity_type,
            entity_id = %record.entity_id,
            actor = ?record.actor.map(|u| *u.as_uuid()),
            "audit record"
        );
        self.records.lock().map_err(poisoned)?.push(record);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, recipient: Recipient) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient == recipient)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<(), PortError> {
        info!(
            target: "notifications",
            recipient = %notification.recipient.entity_id,
            role = %notification.recipient.role,
            kind = ?notification.kind,
            invoice_id = %notification.invoice_id,
            "notification"
        );
        self.sent.lock().map_err(poisoned)?.push(notification);
        Ok(())
    }
}

/// Renders the contract's plain-text form.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextContractRenderer;

impl ContractDocumentRenderer for PlainTextContractRenderer {
    fn render(&self, contract: &Contract) -> Result<RenderedDocument, PortError> {
        Ok(RenderedDocument {
            file_name: format!("{}.txt", contract.contract_number.replace('/', "-")),
            content_type: "text/plain; charset=utf-8".to_string(),
            bytes: render_contract(contract).into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn numbering_restarts_per_type_and_year() {
        let numbering = SequentialContractNumbering::new();
        let y2026 = DateTime::parse_from_rfc3339("2026-12-31T23:00:00Z").unwrap().with_timezone(&Utc);
        let y2027 = DateTime::parse_from_rfc3339("2027-01-01T01:00:00Z").unwrap().with_timezone(&Utc);

        let first = numbering.next_number(ContractType::TwoParty, y2026).await.unwrap();
        let second = numbering.next_number(ContractType::TwoParty, y2026).await.unwrap();
        let three_party = numbering.next_number(ContractType::ThreeParty, y2026).await.unwrap();
        let next_year = numbering.next_number(ContractType::TwoParty, y2027).await.unwrap();

        assert_eq!(first, "SCF/2P/2026/000001");
        assert_eq!(second, "SCF/2P/2026/000002");
        assert_eq!(three_party, "SCF/3P/2026/000001");
        assert_eq!(next_year, "SCF/2P/2027/000001");
    }

    #[tokio::test]
    async fn unknown_entities_have_not_started_kyc() {
        let kyc = InMemoryKycDirectory::new();
        let verified = EntityId::new();
        kyc.set_status(verified, KycStatus::Verified);

        assert_eq!(kyc.status(verified).await.unwrap(), KycStatus::Verified);
        assert_eq!(kyc.status(EntityId::new()).await.unwrap(), KycStatus::NotStarted);
    }

    #[tokio::test]
    async fn bank_accounts_answer_ownership_only_for_the_owner() {
        let accounts = InMemoryBankAccounts::new();
        let (owner, other) = (EntityId::new(), EntityId::new());
        let account = BankAccountId::generate();
        accounts.register(account, owner);

        assert!(accounts.is_owned_by(account, owner).await.unwrap());
        assert!(!accounts.is_owned_by(account, other).await.unwrap());
        assert!(!accounts.is_owned_by(BankAccountId::generate(), owner).await.unwrap());
    }
}
