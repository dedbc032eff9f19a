use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use super::repo::{self, Pool};
use crate::error::StoreError;
use crate::model::{CachedMenu, OrderSyncState, QueuedOrder};

/// Handle to the offline store.
///
/// Opening the pool and running migrations happens once, on first use. Every
/// operation awaits that initialization itself, so callers never need to
/// sequence `initialize()` before other calls. A failed initialization is
/// retried by the next caller.
#[derive(Debug)]
pub struct Store {
    database_url: String,
    pool: OnceCell<Pool>,
    setup_runs: AtomicUsize,
}

impl Store {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: OnceCell::new(),
            setup_runs: AtomicUsize::new(0),
        }
    }

    /// Wrap an already migrated pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            database_url: String::new(),
            pool: OnceCell::new_with(Some(pool)),
            setup_runs: AtomicUsize::new(0),
        }
    }

    async fn setup(&self) -> Result<Pool, StoreError> {
        self.setup_runs.fetch_add(1, Ordering::SeqCst);
        let pool = repo::init_pool(&self.database_url).await?;
        repo::run_migrations(&pool).await?;
        info!(schema_version = super::SCHEMA_VERSION, "offline store ready");
        Ok(pool)
    }

    async fn pool(&self) -> Result<&Pool, StoreError> {
        self.pool
            .get_or_try_init(|| self.setup())
            .await
            .map_err(|err| {
                warn!(?err, "offline store initialization failed");
                StoreError::Unavailable(err.to_string())
            })
    }

    /// Idempotent; concurrent callers share one in-flight setup.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.pool().await.map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.pool.initialized()
    }

    #[cfg(test)]
    pub(crate) fn setup_runs(&self) -> usize {
        self.setup_runs.load(Ordering::SeqCst)
    }

    /// Insert or replace by id. No business validation happens here.
    pub async fn put_order(&self, order: &QueuedOrder) -> Result<(), StoreError> {
        repo::put_order(self.pool().await?, order).await
    }

    pub async fn get_order(&self, id: &str) -> Result<Option<QueuedOrder>, StoreError> {
        repo::get_order(self.pool().await?, id).await
    }

    pub async fn list_orders_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<QueuedOrder>, StoreError> {
        repo::list_orders_by_tenant(self.pool().await?, tenant_id).await
    }

    pub async fn list_orders_by_status(
        &self,
        status: OrderSyncState,
    ) -> Result<Vec<QueuedOrder>, StoreError> {
        repo::list_orders_by_status(self.pool().await?, status).await
    }

    pub async fn count_orders_by_status(&self, status: OrderSyncState) -> Result<u64, StoreError> {
        let count = repo::count_orders_by_status(self.pool().await?, status).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// A missing order is not an error: retention may have removed it between
    /// a listing and this update.
    pub async fn update_order_status(
        &self,
        id: &str,
        status: OrderSyncState,
        attempts: Option<u32>,
    ) -> Result<(), StoreError> {
        repo::update_order_status(self.pool().await?, id, status, attempts).await?;
        Ok(())
    }

    /// Like `update_order_status`, also remembering why the submission failed.
    pub async fn record_sync_failure(
        &self,
        id: &str,
        status: OrderSyncState,
        attempts: u32,
        error: &str,
    ) -> Result<(), StoreError> {
        repo::record_sync_failure(self.pool().await?, id, status, attempts, error).await?;
        Ok(())
    }

    pub async fn requeue_stranded(&self) -> Result<u64, StoreError> {
        repo::requeue_stranded(self.pool().await?).await
    }

    pub async fn reset_failed_order(&self, id: &str) -> Result<bool, StoreError> {
        repo::reset_failed_order(self.pool().await?, id).await
    }

    pub async fn failed_order_errors(&self) -> Result<Vec<(String, Option<String>)>, StoreError> {
        repo::list_failed_errors(self.pool().await?).await
    }

    pub async fn put_menu(&self, menu: &CachedMenu) -> Result<(), StoreError> {
        repo::put_menu(self.pool().await?, menu).await
    }

    pub async fn get_menu(&self, tenant_id: &str) -> Result<Option<CachedMenu>, StoreError> {
        repo::get_menu(self.pool().await?, tenant_id).await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        repo::set_setting(self.pool().await?, key, value).await
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        repo::get_setting(self.pool().await?, key).await
    }

    /// Remove `synced` orders created more than `age_days` ago.
    #[instrument(skip(self))]
    pub async fn purge_synced_older_than(&self, age_days: u32) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(age_days));
        let removed = repo::purge_synced_before(self.pool().await?, cutoff).await?;
        info!(removed, %cutoff, "purged synced orders");
        Ok(removed)
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}
