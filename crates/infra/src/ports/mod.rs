//! Collaborators the workflow depends on but does not own.
//!
//! Each port is a narrow trait; [`memory`] has in-process adapters used by
//! tests and single-node deployments.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scf_core::EntityId;
use scf_financing::{AuditRecord, BankAccountId, Contract, ContractType, Notification, PartyProfile};

pub mod memory;

pub use memory::{
    InMemoryBankAccounts, InMemoryKycDirectory, InMemoryPartyDirectory, PlainTextContractRenderer,
    RecordingAuditSink, RecordingNotificationSink, SequentialContractNumbering,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KycStatus {
    NotStarted,
    Pending,
    Verified,
    Rejected,
}

#[async_trait]
pub trait KycDirectory: Send + Sync {
    async fn status(&self, entity_id: EntityId) -> Result<KycStatus, PortError>;
}

#[async_trait]
pub trait BankAccounts: Send + Sync {
    async fn is_owned_by(
        &self,
        account_id: BankAccountId,
        entity_id: EntityId,
    ) -> Result<bool, PortError>;
}

/// Issues unique, human-readable contract numbers.
#[async_trait]
pub trait ContractNumbering: Send + Sync {
    async fn next_number(
        &self,
        contract_type: ContractType,
        at: DateTime<Utc>,
    ) -> Result<String, PortError>;
}

/// `SCF/<type code>/<year>/<6-digit sequence>`, e.g. `SCF/2P/2026/000001`.
pub fn format_contract_number(contract_type: ContractType, at: DateTime<Utc>, sequence: u64) -> String {
    format!("SCF/{}/{}/{sequence:06}", contract_type.code(), at.year())
}

#[async_trait]
pub trait PartyDirectory: Send + Sync {
    async fn profile(&self, entity_id: EntityId) -> Result<PartyProfile, PortError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), PortError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), PortError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Turns a stored contract snapshot into a downloadable document.
pub trait ContractDocumentRenderer: Send + Sync {
    fn render(&self, contract: &Contract) -> Result<RenderedDocument, PortError>;
}
