use anyhow::Result;
use port_loading::collector::{self, CollectorDeps};
use port_loading::poller::snmp::SnmpConnector;
use port_loading::store::SqliteStore;
use port_loading::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %app_config.database.path,
        "starting"
    );

    let store = Arc::new(
        SqliteStore::connect(&app_config.database.path, app_config.database.max_pool_size).await?,
    );
    store.init().await?;

    let deps = CollectorDeps {
        inventory: store.clone(),
        sink: store,
        connector: Arc::new(SnmpConnector::new(
            app_config.snmp.port,
            app_config.retry_policy(),
        )),
    };
    let collector_config = app_config.collector_config();

    if !app_config.collector.repeat {
        let report = collector::run_cycle(&deps, &collector_config).await;
        if !report.failures.is_empty() {
            tracing::info!(failed = ?report.failed_addresses(), "devices skipped this cycle");
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = collector::spawn_scheduled(
        deps,
        collector_config,
        app_config.schedule()?,
        shutdown_rx,
    );
    shutdown_signal().await;
    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    handle.await?;

    Ok(())
}
