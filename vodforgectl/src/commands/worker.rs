use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vodforge_core::{Reaper, Services, VodforgeConfig};

use crate::Result;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run(config: VodforgeConfig) -> Result<()> {
    init_tracing();
    let services = Services::initialize(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    services.run_worker(shutdown_rx).await?;
    Ok(())
}

pub async fn reap(config: VodforgeConfig) -> Result<()> {
    init_tracing();
    let services = Services::initialize(config)?;
    let reaper = Reaper::new(&services.config, services.queue.clone());
    let report = reaper.sweep().await?;
    println!(
        "removed {} directories, freed {} bytes, purged {} queue entries",
        report.removed_dirs, report.freed_bytes, report.queue_entries_removed
    );
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
