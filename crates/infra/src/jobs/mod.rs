//! Contract-generation outbox: jobs with retry, backoff and dead letters.
//!
//! - [`Job`] targets one contract (self-funded offer or accepted bid)
//! - [`JobStore`] persists jobs and the dead-letter queue
//! - [`ContractJobWorker`] claims ready jobs and runs them through the outbox

pub mod store;
pub mod types;
pub mod worker;

pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, ContractTarget, DeadLetterEntry, Job, JobAttemptRecord, JobId, JobStatus,
    RetryPolicy,
};
pub use worker::ContractJobWorker;
