//! Infrastructure for the invoice financing workflow: transactional storage,
//! the five workflow components, side-effect dispatch, the contract outbox,
//! sweeps and external-collaborator ports.

pub mod background;
pub mod config;
pub mod effects;
pub mod error;
pub mod jobs;
pub mod ports;
pub mod relationships;
pub mod store;
pub mod sweeps;
pub mod workflow;

pub use config::{ConfigError, WorkflowConfig};
pub use error::{WorkflowError, WorkflowResult};
pub use workflow::{FinancingWorkflow, InMemoryAdapters, WorkflowContext};

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod integration_tests;
