//! Online/offline state of the host, as reported by the host.
//!
//! The monitor never probes by itself; something outside it (an OS hook, a
//! UI event, or the optional TCP reachability loop below) calls `set_online`.
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    /// Cached state; no network access.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a reported state. Returns `true` only on an actual transition,
    /// which is also the only case subscribers are woken for.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// One TCP reachability check against `addr` (`host:port`).
pub async fn probe(addr: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            debug!(addr, %err, "reachability probe failed");
            false
        }
        Err(_) => {
            debug!(addr, "reachability probe timed out");
            false
        }
    }
}

/// Feed `monitor` from periodic reachability probes until `shutdown` fires.
pub fn spawn_probe(
    monitor: ConnectivityMonitor,
    addr: String,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let online = probe(&addr, timeout).await;
                    monitor.set_online(online);
                }
            }
        }
        debug!("reachability probe stopped");
    })
}
