//! Error returned by workflow operations.

use thiserror::Error;

use scf_core::DomainError;

use crate::jobs::JobStoreError;
use crate::ports::PortError;
use crate::store::StoreError;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// The domain taxonomy plus infrastructure failures.
///
/// Any error returned from a transactional operation means nothing was
/// committed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// An external collaborator (KYC, party directory, ...) is unreachable.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Store(StoreError),
}

impl WorkflowError {
    pub fn not_found(kind: &str, id: impl core::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    /// Stable machine-readable code (HTTP bodies, logs).
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::InvalidState(_) => "invalid_state",
            WorkflowError::Conflict(_) => "conflict",
            WorkflowError::Validation(_) => "validation_error",
            WorkflowError::Unavailable(_) => "unavailable",
            WorkflowError::Store(_) => "internal_error",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkflowError::Unavailable(_) | WorkflowError::Store(StoreError::Backend(_))
        )
    }
}

impl From<DomainError> for WorkflowError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(m) => WorkflowError::NotFound(m),
            DomainError::Forbidden(m) => WorkflowError::Forbidden(m),
            DomainError::InvalidState(m) => WorkflowError::InvalidState(m),
            DomainError::Conflict(m) => WorkflowError::Conflict(m),
            DomainError::Validation(m) | DomainError::InvalidId(m) => WorkflowError::Validation(m),
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(m) => WorkflowError::Conflict(m),
            other => WorkflowError::Store(other),
        }
    }
}

impl From<PortError> for WorkflowError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(m) => WorkflowError::NotFound(m),
            PortError::Unavailable(m) => WorkflowError::Unavailable(m),
        }
    }
}

impl From<JobStoreError> for WorkflowError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => WorkflowError::not_found("contract job", id),
            JobStoreError::AlreadyExists(id) => {
                WorkflowError::Conflict(format!("contract job {id} already exists"))
            }
            JobStoreError::Storage(m) => WorkflowError::Store(StoreError::Backend(m)),
        }
    }
}
