//! The sync engine: drains queued orders to the backend while online and
//! publishes aggregate status to subscribers.
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::capture::{self, OrderDraft};
use crate::connectivity::ConnectivityMonitor;
use crate::db::{Store, LAST_SYNC_KEY};
use crate::error::{RemoteError, StoreError, SyncError};
use crate::model::{CachedMenu, OrderSyncState, QueuedOrder, SyncStatus};
use crate::remote::{BackendHandle, OrderBackend, OrderPayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub drain_interval: Duration,
    pub max_attempts: u32,
    pub retention_days: u32,
    pub request_timeout: Duration,
    pub service_fee_percent: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(30),
            max_attempts: 3,
            retention_days: 7,
            request_timeout: Duration::from_secs(15),
            service_fee_percent: Decimal::TEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    NotConfigured,
    Busy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    /// Failed this pass, back in `pending_sync`.
    pub retrying: usize,
    /// Failed for the last time, now in `error`.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Skipped(SkipReason),
    Completed(DrainReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReceipt {
    pub order_id: String,
    pub status: OrderSyncState,
}

type StatusCallback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

struct Lifecycle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    store: Arc<Store>,
    backend: BackendHandle,
    monitor: ConnectivityMonitor,
    settings: EngineSettings,
    busy: AtomicBool,
    next_subscriber: AtomicU64,
    subscribers: Mutex<Vec<(u64, StatusCallback)>>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds the drain busy flag; released on drop, including early returns.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle returned by `on_status_change`.
pub struct Subscription {
    id: u64,
    engine: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.engine.upgrade() {
            locked(&inner.subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}

/// Owner of the order sync state machine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<Store>,
        backend: BackendHandle,
        monitor: ConnectivityMonitor,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                monitor,
                settings,
                busy: AtomicBool::new(false),
                next_subscriber: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// One pass over the `pending_sync` orders.
    ///
    /// Returns `Skipped` without touching the store when offline, without a
    /// backend, or while another drain is running. Orders are submitted one at
    /// a time; a storage failure on one order is logged and the pass goes on.
    #[instrument(skip_all)]
    pub async fn drain_queue(&self) -> Result<DrainOutcome, SyncError> {
        if !self.inner.monitor.is_online() {
            debug!("drain skipped: offline");
            return Ok(DrainOutcome::Skipped(SkipReason::Offline));
        }
        let backend = match &self.inner.backend {
            BackendHandle::Configured(backend) => backend.clone(),
            BackendHandle::NotConfigured(reason) => {
                debug!(%reason, "drain skipped: backend not configured");
                return Ok(DrainOutcome::Skipped(SkipReason::NotConfigured));
            }
        };
        let Some(guard) = BusyGuard::acquire(&self.inner.busy) else {
            debug!("drain skipped: already running");
            return Ok(DrainOutcome::Skipped(SkipReason::Busy));
        };

        self.broadcast().await;
        let store = &self.inner.store;
        store.initialize().await?;
        let pending = store.list_orders_by_status(OrderSyncState::PendingSync).await?;

        let mut report = DrainReport::default();
        for order in pending {
            let order_id = order.id.clone();
            report.attempted += 1;
            match self.sync_one(backend.as_ref(), order).await {
                Ok(OrderSyncState::Synced) => report.synced += 1,
                Ok(OrderSyncState::Error) => report.failed += 1,
                Ok(_) => report.retrying += 1,
                Err(err) => {
                    warn!(?err, %order_id, "storage error while syncing order");
                    report.retrying += 1;
                }
            }
        }

        if let Err(err) = store.set_setting(LAST_SYNC_KEY, &Utc::now().to_rfc3339()).await {
            warn!(?err, "failed to record last sync time");
        }
        drop(guard);

        info!(
            attempted = report.attempted,
            synced = report.synced,
            retrying = report.retrying,
            failed = report.failed,
            "drain finished"
        );
        self.broadcast().await;
        Ok(DrainOutcome::Completed(report))
    }

    async fn sync_one(
        &self,
        backend: &dyn OrderBackend,
        order: QueuedOrder,
    ) -> Result<OrderSyncState, StoreError> {
        let store = &self.inner.store;
        let settings = &self.inner.settings;
        let attempts = order.sync_attempts.saturating_add(1);
        store
            .update_order_status(&order.id, OrderSyncState::Syncing, Some(attempts))
            .await?;

        let result = match OrderPayload::try_from(&order) {
            Ok(payload) => {
                let submit = backend.submit_order(&payload);
                match tokio::time::timeout(settings.request_timeout, submit).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Timeout(settings.request_timeout)),
                }
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                if let Err(err) = store
                    .update_order_status(&order.id, OrderSyncState::Synced, None)
                    .await
                {
                    // The backend has it; a resubmission is ignored server side.
                    warn!(
                        ?err,
                        order_id = %order.id,
                        "order sent but not marked synced, requeueing"
                    );
                    store
                        .update_order_status(&order.id, OrderSyncState::PendingSync, None)
                        .await?;
                    return Ok(OrderSyncState::PendingSync);
                }
                info!(order_id = %order.id, attempts, "order synced");
                Ok(OrderSyncState::Synced)
            }
            Err(err) => {
                let next = if attempts >= settings.max_attempts {
                    OrderSyncState::Error
                } else {
                    OrderSyncState::PendingSync
                };
                warn!(
                    ?err,
                    order_id = %order.id,
                    attempts,
                    next = next.as_str(),
                    "order submission failed"
                );
                store
                    .record_sync_failure(&order.id, next, attempts, &err.to_string())
                    .await?;
                Ok(next)
            }
        }
    }

    /// Explicit "sync now". Unlike `drain_queue`, refuses loudly when it
    /// cannot run.
    pub async fn force_sync(&self) -> Result<DrainOutcome, SyncError> {
        if !self.inner.monitor.is_online() {
            return Err(SyncError::Offline);
        }
        if let BackendHandle::NotConfigured(reason) = &self.inner.backend {
            return Err(SyncError::NotConfigured(reason.clone()));
        }
        self.drain_queue().await
    }

    /// Current aggregate state, read from the store and the monitor.
    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        let store = &self.inner.store;
        let pending_orders = store.count_orders_by_status(OrderSyncState::PendingSync).await?;
        let last_sync = store
            .get_setting(LAST_SYNC_KEY)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let errors = store
            .failed_order_errors()
            .await?
            .into_iter()
            .map(|(id, err)| format!("{}: {}", id, err.as_deref().unwrap_or("sync failed")))
            .collect();
        Ok(SyncStatus {
            is_online: self.inner.monitor.is_online(),
            last_sync,
            pending_orders,
            is_syncing: self.is_syncing(),
            errors,
        })
    }

    /// Register a status callback. Callbacks run on the notifying task and
    /// must not block.
    pub fn on_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        locked(&self.inner.subscribers).push((id, Arc::new(callback)));
        Subscription {
            id,
            engine: Arc::downgrade(&self.inner),
        }
    }

    async fn broadcast(&self) {
        match self.status().await {
            Ok(status) => self.notify(&status),
            Err(err) => warn!(?err, "could not compute sync status"),
        }
    }

    fn notify(&self, status: &SyncStatus) {
        let subscribers: Vec<(u64, StatusCallback)> = locked(&self.inner.subscribers).clone();
        for (id, callback) in subscribers {
            if let Err(panic_info) = panic::catch_unwind(AssertUnwindSafe(|| callback(status))) {
                let panic_msg: String = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                warn!(subscriber = id, panic = %panic_msg, "status subscriber panicked");
            }
        }
    }

    /// Pull the tenant's catalog and replace the cached copy.
    ///
    /// Returns `false` when the refresh was not possible; the previous cache
    /// is then left as it was.
    #[instrument(skip(self))]
    pub async fn refresh_menu(&self, tenant_id: &str) -> Result<bool, SyncError> {
        if !self.inner.monitor.is_online() {
            debug!("menu refresh skipped: offline");
            return Ok(false);
        }
        let backend = match &self.inner.backend {
            BackendHandle::Configured(backend) => backend.clone(),
            BackendHandle::NotConfigured(reason) => {
                debug!(%reason, "menu refresh skipped: backend not configured");
                return Ok(false);
            }
        };
        let timeout = self.inner.settings.request_timeout;
        let fetched = match tokio::time::timeout(timeout, backend.fetch_catalog(tenant_id)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        };
        let categories = match fetched {
            Ok(categories) => categories,
            Err(err) => {
                warn!(?err, "menu refresh failed; keeping cached menu");
                return Ok(false);
            }
        };
        let menu = CachedMenu {
            tenant_id: tenant_id.to_string(),
            categories,
            last_updated: Utc::now(),
        };
        self.inner.store.put_menu(&menu).await?;
        info!(categories = menu.categories.len(), "menu cache refreshed");
        Ok(true)
    }

    pub async fn cached_menu(&self, tenant_id: &str) -> Result<Option<CachedMenu>, SyncError> {
        Ok(self.inner.store.get_menu(tenant_id).await?)
    }

    /// Retention sweep over old `synced` orders.
    pub async fn cleanup(&self) -> Result<u64, SyncError> {
        let removed = self
            .inner
            .store
            .purge_synced_older_than(self.inner.settings.retention_days)
            .await?;
        Ok(removed)
    }

    /// Manual resubmission of an order that exhausted its attempts.
    pub async fn requeue_failed(&self, order_id: &str) -> Result<(), SyncError> {
        if !self.inner.store.reset_failed_order(order_id).await? {
            return Err(SyncError::NotFound(order_id.to_string()));
        }
        info!(%order_id, "failed order requeued");
        self.broadcast().await;
        Ok(())
    }

    /// Validate and durably queue a new order, then try to send it right away.
    ///
    /// The order is persisted before any network access, so a crash or a
    /// failed submission never loses it.
    #[instrument(skip_all, fields(tenant_id = %draft.tenant_id))]
    pub async fn capture_order(&self, draft: OrderDraft) -> Result<CaptureReceipt, SyncError> {
        let order = capture::build_order(draft, self.inner.settings.service_fee_percent)?;
        self.inner.store.put_order(&order).await?;
        info!(
            order_id = %order.id,
            total = %order.total,
            channel = order.channel.as_str(),
            "order captured"
        );

        match self.drain_queue().await {
            Ok(DrainOutcome::Completed(_)) => {}
            Ok(DrainOutcome::Skipped(reason)) => {
                debug!(?reason, "captured order left queued");
                self.broadcast().await;
            }
            Err(err) => warn!(?err, order_id = %order.id, "drain after capture failed"),
        }

        let status = self
            .inner
            .store
            .get_order(&order.id)
            .await?
            .map(|stored| stored.status)
            .unwrap_or(order.status);
        Ok(CaptureReceipt {
            order_id: order.id,
            status,
        })
    }

    /// Recover orders stranded in `syncing` and start following connectivity.
    ///
    /// While online a periodic drain runs every `drain_interval`, starting
    /// immediately. Calling `start` on a running engine does nothing.
    pub async fn start(&self) -> Result<(), SyncError> {
        if locked(&self.inner.lifecycle).is_some() {
            return Ok(());
        }
        self.inner.store.initialize().await?;
        let recovered = self.inner.store.requeue_stranded().await?;
        if recovered > 0 {
            info!(recovered, "requeued orders stranded in syncing");
        }

        let shutdown = CancellationToken::new();
        let mut lifecycle = locked(&self.inner.lifecycle);
        if lifecycle.is_some() {
            return Ok(());
        }
        let task = tokio::spawn(run_lifecycle(self.clone(), shutdown.clone()));
        *lifecycle = Some(Lifecycle { shutdown, task });
        info!(
            interval_secs = self.inner.settings.drain_interval.as_secs(),
            "sync engine started"
        );
        Ok(())
    }

    /// Stop timers and wait for them. A drain already running finishes first.
    pub async fn shutdown(&self) {
        let lifecycle = locked(&self.inner.lifecycle).take();
        if let Some(lifecycle) = lifecycle {
            lifecycle.shutdown.cancel();
            if let Err(err) = lifecycle.task.await {
                warn!(?err, "sync lifecycle task ended abnormally");
            }
            info!("sync engine stopped");
        }
    }
}

fn spawn_drain_timer(engine: SyncEngine, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        // The first tick completes immediately: going online drains right away.
        let mut ticker = interval(engine.inner.settings.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = engine.drain_queue().await {
                        warn!(?err, "periodic drain failed");
                    }
                }
            }
        }
        debug!("drain timer stopped");
    })
}

async fn run_lifecycle(engine: SyncEngine, shutdown: CancellationToken) {
    let mut online_rx = engine.inner.monitor.subscribe();
    let mut timer: Option<(CancellationToken, JoinHandle<()>)> = None;

    let initially_online = *online_rx.borrow_and_update();
    if initially_online {
        let token = shutdown.child_token();
        timer = Some((token.clone(), spawn_drain_timer(engine.clone(), token)));
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                if online {
                    if timer.is_none() {
                        let token = shutdown.child_token();
                        timer = Some((token.clone(), spawn_drain_timer(engine.clone(), token)));
                    }
                } else if let Some((token, _)) = timer.take() {
                    // The in-flight drain, if any, runs to completion.
                    token.cancel();
                }
                engine.broadcast().await;
            }
        }
    }

    if let Some((token, handle)) = timer.take() {
        token.cancel();
        if let Err(err) = handle.await {
            warn!(?err, "drain timer ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let first = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(first);
        assert!(!flag.load(Ordering::Acquire));
        assert!(BusyGuard::acquire(&flag).is_some());
    }

    #[test]
    fn default_settings_match_documented_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.drain_interval, Duration::from_secs(30));
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.retention_days, 7);
        assert_eq!(settings.service_fee_percent, Decimal::TEN);
    }

    #[tokio::test]
    async fn unsubscribed_callbacks_are_not_called() {
        let td = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(format!("sqlite://{}/pos.db", td.path().display())));
        let engine = SyncEngine::new(
            store,
            BackendHandle::NotConfigured("test".into()),
            ConnectivityMonitor::new(false),
            EngineSettings::default(),
        );
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        let sub = engine.on_status_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        engine.broadcast().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        engine.broadcast().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
