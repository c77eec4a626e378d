use std::sync::Arc;
use tokio::signal;

use durability_core::config::AppConfig;
use durability_core::db::connection::{close_pool, create_pool};
use durability_core::db::migrate::migrate;
use durability_core::services::database_port::PgToolPort;
use durability_core::services::scheduler::BackupScheduler;
use durability_core::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    tracing::info!(database = %config.database.name, "Starting durability service");

    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.backups_dir)?;

    let pool = create_pool(&config.db_path)?;
    migrate(&pool)?;

    let port = Arc::new(PgToolPort::new(config.database.clone()));
    let state = Arc::new(AppState::new(pool, config, port));

    let scheduler = match BackupScheduler::new(state.clone()).await {
        Ok(s) => {
            if let Err(e) = s.init_schedules().await {
                tracing::warn!(error = %e, "Failed to initialize schedules");
            }
            if let Err(e) = s.start().await {
                tracing::warn!(error = %e, "Failed to start scheduler");
            }
            Some(s)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create scheduler");
            None
        }
    };

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!(error = %e, "Scheduler shutdown error");
        }
    }

    close_pool(&state.db);
    tracing::info!("Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
