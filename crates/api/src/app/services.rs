//! Service wiring: the workflow, its adapters and the background workers.

use std::sync::Arc;

use scf_infra::relationships::{RelationshipWorker, SharedRelationshipTracker, WorkerHandle};
use scf_infra::sweeps::SweepScheduler;
use scf_infra::background::BackgroundHandle;
use scf_infra::jobs::ContractJobWorker;
use scf_infra::{FinancingWorkflow, InMemoryAdapters, WorkflowConfig, WorkflowContext};

#[cfg(feature = "postgres")]
use scf_infra::store::{PgContractNumbering, PgWorkflowStore};

/// Everything request handlers need.
#[derive(Clone)]
pub struct AppServices {
    pub workflow: FinancingWorkflow,
    pub config: WorkflowConfig,
    pub relationships: SharedRelationshipTracker,
    /// Handles on the in-process adapters (KYC, party directory, bank
    /// accounts, sinks). Operators seed them; tests inspect them.
    pub adapters: InMemoryAdapters,
}

/// Background work started next to the HTTP server.
pub struct BackgroundWorkers {
    sweeps: BackgroundHandle,
    contracts: BackgroundHandle,
    relationships: WorkerHandle,
}

impl BackgroundWorkers {
    pub async fn shutdown(self) {
        self.sweeps.shutdown().await;
        self.contracts.shutdown().await;
        // The relationship worker joins a thread.
        let relationships = self.relationships;
        let _ = tokio::task::spawn_blocking(move || relationships.shutdown()).await;
    }
}

/// Fully in-process services.
pub fn build_services(config: WorkflowConfig) -> AppServices {
    let (ctx, adapters) = WorkflowContext::in_memory(config.clone());
    assemble(ctx, adapters, config)
}

/// Services backed by Postgres for workflow records and contract numbers.
/// The remaining collaborators stay in-process.
#[cfg(feature = "postgres")]
pub async fn build_postgres_services(
    config: WorkflowConfig,
    database_url: &str,
) -> anyhow::Result<AppServices> {
    let store = PgWorkflowStore::connect(database_url, 10).await?;
    store.migrate().await?;
    let numbering = PgContractNumbering::new(store.pool().clone());

    let (mut ctx, adapters) = WorkflowContext::in_memory(config.clone());
    ctx.store = Arc::new(store);
    ctx.numbering = Arc::new(numbering);
    tracing::info!("workflow store: postgres");
    Ok(assemble(ctx, adapters, config))
}

fn assemble(ctx: WorkflowContext, adapters: InMemoryAdapters, config: WorkflowConfig) -> AppServices {
    AppServices {
        workflow: FinancingWorkflow::new(ctx),
        config,
        relationships: SharedRelationshipTracker::default(),
        adapters,
    }
}

/// Start the sweeps, the contract outbox worker and the relationship tracker.
pub fn spawn_background(services: &AppServices) -> std::io::Result<BackgroundWorkers> {
    let sweeps = SweepScheduler::new(services.workflow.clone(), services.config.clone()).spawn();
    let contracts = ContractJobWorker::new(
        services.workflow.outbox.clone(),
        services.config.contract_worker_poll(),
    )
    .spawn();
    let relationships = RelationshipWorker::spawn(
        services.adapters.relationships.as_ref(),
        Arc::clone(&services.relationships),
    )?;

    Ok(BackgroundWorkers {
        sweeps,
        contracts,
        relationships,
    })
}
