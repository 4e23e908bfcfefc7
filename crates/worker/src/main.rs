use std::sync::Arc;

use anyhow::Context;
use helpdesk_worker::{scheduler, AutoCloseSweeper, PgSweepStore, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env().context("invalid configuration")?;

    let pool = helpdesk_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;

    let sweeper = Arc::new(AutoCloseSweeper::new(
        Arc::new(PgSweepStore::new(pool)),
        config.inactivity(),
    ));

    let mut scheduler = scheduler::start(&config, sweeper)
        .await
        .context("failed to start scheduler")?;

    tracing::info!("helpdesk-worker running");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received");
    scheduler.shutdown().await.context("failed to stop scheduler")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
