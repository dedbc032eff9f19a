use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pos_sync::config;
use pos_sync::connectivity::{self, ConnectivityMonitor};
use pos_sync::{BackendHandle, Store, SyncEngine};

#[derive(Debug, Parser)]
#[command(author, version, about = "Offline-first order sync daemon for a POS till")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Start as offline and never probe the backend
    #[arg(long)]
    offline: bool,
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

    let client = cfg.supabase_client()?;
    let probe_addr = client.as_ref().and_then(|c| c.probe_addr());
    let backend = match client {
        Some(client) => {
            if let Some((email, password)) = cfg.backend.credentials() {
                if let Err(err) = client.sign_in_with_password(email, password).await {
                    // The anon key still works for inserts; retry on next start.
                    warn!(?err, "staff sign-in failed; continuing with anon key");
                }
            }
            info!(session = client.has_session(), "backend configured");
            BackendHandle::configured(client)
        }
        None => {
            warn!("no backend configured; orders stay queued locally");
            BackendHandle::NotConfigured(config::not_configured_reason().to_string())
        }
    };

    let monitor = ConnectivityMonitor::new(false);
    if let (false, Some(addr)) = (args.offline, probe_addr.as_deref()) {
        monitor.set_online(connectivity::probe(addr, cfg.probe_timeout()).await);
    }
    let engine = SyncEngine::new(store.clone(), backend, monitor.clone(), cfg.engine_settings());
    let _status_log = engine.on_status_change(|status| {
        info!(
            online = status.is_online,
            pending = status.pending_orders,
            syncing = status.is_syncing,
            errors = status.errors.len(),
            "sync status"
        );
    });
    engine.start().await?;

    let shutdown = CancellationToken::new();
    let probe = match (args.offline, probe_addr) {
        (false, Some(addr)) => {
            info!(%addr, "probing backend reachability");
            Some(connectivity::spawn_probe(
                monitor.clone(),
                addr,
                cfg.probe_interval(),
                cfg.probe_timeout(),
                shutdown.child_token(),
            ))
        }
        _ => None,
    };

    let cleanup_engine = engine.clone();
    let cleanup_every = cfg.cleanup_interval();
    let cleanup_token = shutdown.child_token();
    let cleanup = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_every);
        loop {
            tokio::select! {
                _ = cleanup_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = cleanup_engine.cleanup().await {
                        error!(?err, "retention sweep failed");
                    }
                }
            }
        }
    });

    if let Err(err) = refresh_menu_at_startup(&engine, &cfg.app.tenant_id).await {
        warn!(?err, "initial menu refresh failed");
    }

    info!(tenant = %cfg.app.tenant_id, store = %cfg.app.store_id, "pos sync daemon running");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    shutdown.cancel();
    if let Some(probe) = probe {
        let _ = probe.await;
    }
    let _ = cleanup.await;
    engine.shutdown().await;
    store.close().await;
    Ok(())
}

/// Best-effort catalog pull at startup; offline tills keep their cached menu.
async fn refresh_menu_at_startup(engine: &SyncEngine, tenant_id: &str) -> Result<()> {
    let refreshed = engine.refresh_menu(tenant_id).await?;
    if !refreshed {
        info!("menu not refreshed; serving cached copy");
    }
    Ok(())
}
