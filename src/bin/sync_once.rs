use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use pos_sync::config;
use pos_sync::connectivity::{self, ConnectivityMonitor};
use pos_sync::{BackendHandle, DrainOutcome, Store, SyncEngine};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Drain queued orders to the backend once and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Also remove synced orders older than the retention window
    #[arg(long)]
    purge: bool,

    /// Also refresh the cached menu for the configured tenant
    #[arg(long)]
    refresh_menu: bool,

    /// Skip the reachability probe and assume the backend is reachable
    #[arg(long)]
    assume_online: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let store = Arc::new(Store::new(cfg.database_url()));
    store.initialize().await?;
    let recovered = store.requeue_stranded().await?;
    if recovered > 0 {
        info!(recovered, "requeued orders stranded in syncing");
    }

    let Some(client) = cfg.supabase_client()? else {
        bail!(config::not_configured_reason());
    };
    let online = match (args.assume_online, client.probe_addr()) {
        (true, _) => true,
        (false, Some(addr)) => connectivity::probe(&addr, cfg.probe_timeout()).await,
        (false, None) => false,
    };
    if let Some((email, password)) = cfg.backend.credentials() {
        if online {
            client.sign_in_with_password(email, password).await?;
        }
    }

    let monitor = ConnectivityMonitor::new(online);
    let engine = SyncEngine::new(
        store.clone(),
        BackendHandle::configured(client),
        monitor,
        cfg.engine_settings(),
    );

    match engine.force_sync().await? {
        DrainOutcome::Completed(report) => info!(
            attempted = report.attempted,
            synced = report.synced,
            retrying = report.retrying,
            failed = report.failed,
            "sync pass complete"
        ),
        DrainOutcome::Skipped(reason) => warn!(?reason, "sync pass skipped"),
    }

    if args.refresh_menu && !engine.refresh_menu(&cfg.app.tenant_id).await? {
        warn!("menu refresh failed; cached menu kept");
    }
    if args.purge {
        let removed = engine.cleanup().await?;
        info!(removed, "retention sweep complete");
    }

    let status = engine.status().await?;
    info!(
        pending = status.pending_orders,
        last_sync = ?status.last_sync,
        errors = status.errors.len(),
        "final queue state"
    );
    for err in &status.errors {
        warn!(%err, "order needs attention");
    }

    store.close().await;
    Ok(())
}
