use std::sync::Arc;

use anyhow::Context;

use sessionguard_api::{app, audit};
use sessionguard_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sessionguard_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(config = ?config, "configuration loaded");

    let services = Arc::new(
        app::services::build_services(&config)
            .await
            .context("failed to build services")?,
    );

    audit::spawn_audit_log(&*services.events).context("failed to start audit log")?;
    if let Some(every) = config.purge_interval {
        app::services::spawn_idle_purge(services.auth.clone(), every);
    }

    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
