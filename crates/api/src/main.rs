use std::sync::Arc;

use anyhow::Context;

use scf_api::app::{self, services};
use scf_infra::WorkflowConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scf_observability::init();

    let config = WorkflowConfig::from_env().context("invalid workflow configuration")?;

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let bind_addr = std::env::var("SCF_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    #[cfg(feature = "postgres")]
    let services = {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        services::build_postgres_services(config, &database_url).await?
    };
    #[cfg(not(feature = "postgres"))]
    let services = services::build_services(config);

    let services = Arc::new(services);
    let workers = services::spawn_background(&services).context("failed to start background workers")?;
    let app = app::build_app(jwt_secret, services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    workers.shutdown().await;
    Ok(())
}
