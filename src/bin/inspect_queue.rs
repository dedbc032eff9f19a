use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use pos_sync::config;
use pos_sync::model::{OrderSyncState, QueuedOrder};
use pos_sync::{BackendHandle, ConnectivityMonitor, Store, SyncEngine};

#[derive(Debug, Parser)]
#[command(author, version, about = "Print the offline order queue")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only orders of this tenant
    #[arg(long)]
    tenant: Option<String>,

    /// Only orders in this state: pending_sync, syncing, synced or error
    #[arg(long)]
    status: Option<String>,

    /// Move an order out of `error` back into the queue, then print
    #[arg(long, value_name = "ORDER_ID")]
    requeue: Option<String>,

    /// Print orders as JSON lines
    #[arg(long)]
    json: bool,
}

fn print_order(order: &QueuedOrder, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(order)?);
        return Ok(());
    }
    println!(
        "{}  {:<12} {:<9} attempts={} total={} items={} created={}{}",
        order.id,
        order.status.as_str(),
        order.channel.as_str(),
        order.sync_attempts,
        order.total,
        order.items.len(),
        order.created_at.to_rfc3339(),
        order
            .last_error
            .as_deref()
            .map(|e| format!("  last_error={e}"))
            .unwrap_or_default(),
    );
    Ok(())
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

    let store = Arc::new(Store::new(cfg.database_url()));
    let engine = SyncEngine::new(
        store.clone(),
        BackendHandle::NotConfigured("inspection only".into()),
        ConnectivityMonitor::new(false),
        cfg.engine_settings(),
    );

    if let Some(order_id) = &args.requeue {
        engine.requeue_failed(order_id).await?;
        println!("requeued {order_id}");
    }

    let status_filter = args
        .status
        .as_deref()
        .map(|s| OrderSyncState::parse_state(s).ok_or_else(|| anyhow!("unknown status: {s}")))
        .transpose()?;

    let mut orders: Vec<QueuedOrder> = match (&args.tenant, status_filter) {
        (Some(tenant), status) => store
            .list_orders_by_tenant(tenant)
            .await?
            .into_iter()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .collect(),
        (None, Some(status)) => store.list_orders_by_status(status).await?,
        (None, None) => {
            let mut all = Vec::new();
            for status in [
                OrderSyncState::PendingSync,
                OrderSyncState::Syncing,
                OrderSyncState::Error,
                OrderSyncState::Synced,
            ] {
                all.extend(store.list_orders_by_status(status).await?);
            }
            all
        }
    };
    orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    for order in &orders {
        print_order(order, args.json)?;
    }

    let status = engine.status().await?;
    println!(
        "pending={} last_sync={} failed={}",
        status.pending_orders,
        status
            .last_sync
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "never".into()),
        status.errors.len()
    );
    if let Some(menu) = engine.cached_menu(&cfg.app.tenant_id).await? {
        println!(
            "menu: {} categories, updated {}",
            menu.categories.len(),
            menu.last_updated.to_rfc3339()
        );
    }

    store.close().await;
    Ok(())
}
