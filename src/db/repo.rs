use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::model::{MenuRow, OrderRow};
use crate::error::StoreError;
use crate::model::{CachedMenu, OrderSyncState, QueuedOrder};

pub type Pool = SqlitePool;

/// Embedded schema migrations. Versions only ever add tables, columns or
/// indexes so queued orders survive an upgrade.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ORDER_COLUMNS: &str = "id, tenant_id, store_id, channel, table_number, customer, items, \
     subtotal, discount, service_fee, total, status, sync_attempts, created_at, last_error";

pub async fn init_pool(database_url: &str) -> Result<Pool, StoreError> {
    let normalized = prepare_sqlite_url(database_url);
    // Enable WAL and stricter durability.
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let mut pool_options = SqlitePoolOptions::new();
    if normalized.starts_with("sqlite::memory") {
        // Each connection to :memory: is its own database; pin exactly one.
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    Ok(pool_options.connect_with(options).await?)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StoreError> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

fn to_json<T: serde::Serialize>(
    kind: &'static str,
    key: &str,
    value: &T,
) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Malformed {
        kind,
        key: key.to_string(),
        detail: err.to_string(),
    })
}

fn decode_orders(rows: Vec<OrderRow>) -> Result<Vec<QueuedOrder>, StoreError> {
    rows.into_iter().map(QueuedOrder::try_from).collect()
}

#[instrument(skip_all, fields(order_id = %order.id))]
pub async fn put_order(pool: &Pool, order: &QueuedOrder) -> Result<(), StoreError> {
    let items = to_json("order", &order.id, &order.items)?;
    let customer = order
        .customer
        .as_ref()
        .map(|c| to_json("order", &order.id, c))
        .transpose()?;

    sqlx::query(
        "INSERT OR REPLACE INTO orders (id, tenant_id, store_id, channel, table_number, customer, items, \
         subtotal, discount, service_fee, total, status, sync_attempts, created_at, last_error, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&order.id)
    .bind(&order.tenant_id)
    .bind(&order.store_id)
    .bind(order.channel.as_str())
    .bind(&order.table_number)
    .bind(customer)
    .bind(items)
    .bind(order.subtotal.to_string())
    .bind(order.discount.to_string())
    .bind(order.service_fee.to_string())
    .bind(order.total.to_string())
    .bind(order.status.as_str())
    .bind(i64::from(order.sync_attempts))
    .bind(order.created_at.timestamp_millis())
    .bind(&order.last_error)
    .bind(Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_order(pool: &Pool, id: &str) -> Result<Option<QueuedOrder>, StoreError> {
    let row =
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(QueuedOrder::try_from).transpose()
}

#[instrument(skip_all)]
pub async fn list_orders_by_tenant(
    pool: &Pool,
    tenant_id: &str,
) -> Result<Vec<QueuedOrder>, StoreError> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE tenant_id = ?",
        ORDER_COLUMNS
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    decode_orders(rows)
}

/// Orders in `status`, oldest first.
#[instrument(skip_all, fields(status = status.as_str()))]
pub async fn list_orders_by_status(
    pool: &Pool,
    status: OrderSyncState,
) -> Result<Vec<QueuedOrder>, StoreError> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE status = ? ORDER BY created_at ASC, id ASC",
        ORDER_COLUMNS
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    decode_orders(rows)
}

#[instrument(skip_all)]
pub async fn count_orders_by_status(
    pool: &Pool,
    status: OrderSyncState,
) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Returns `false` when no order has `id`.
#[instrument(skip_all, fields(order_id = id, status = status.as_str()))]
pub async fn update_order_status(
    pool: &Pool,
    id: &str,
    status: OrderSyncState,
    attempts: Option<u32>,
) -> Result<bool, StoreError> {
    let res = sqlx::query(
        "UPDATE orders SET status = ?, sync_attempts = COALESCE(?, sync_attempts), \
         last_error = CASE WHEN ? = 'synced' THEN NULL ELSE last_error END, updated_at = ? \
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(attempts.map(i64::from))
    .bind(status.as_str())
    .bind(Utc::now().timestamp_millis())
    .bind(id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        debug!(order_id = id, "status update for missing order ignored");
    }
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all, fields(order_id = id, status = status.as_str()))]
pub async fn record_sync_failure(
    pool: &Pool,
    id: &str,
    status: OrderSyncState,
    attempts: u32,
    error: &str,
) -> Result<bool, StoreError> {
    let res = sqlx::query(
        "UPDATE orders SET status = ?, sync_attempts = ?, last_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(i64::from(attempts))
    .bind(error)
    .bind(Utc::now().timestamp_millis())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Move orders left in `syncing` by an interrupted process back to `pending_sync`.
#[instrument(skip_all)]
pub async fn requeue_stranded(pool: &Pool) -> Result<u64, StoreError> {
    let res = sqlx::query("UPDATE orders SET status = 'pending_sync', updated_at = ? WHERE status = 'syncing'")
        .bind(Utc::now().timestamp_millis())
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Manual resubmission of an order in `error`: back to `pending_sync` with a
/// fresh attempt budget. Returns `false` if the order is missing or not failed.
#[instrument(skip_all, fields(order_id = id))]
pub async fn reset_failed_order(pool: &Pool, id: &str) -> Result<bool, StoreError> {
    let res = sqlx::query(
        "UPDATE orders SET status = 'pending_sync', sync_attempts = 0, last_error = NULL, updated_at = ? \
         WHERE id = ? AND status = 'error'",
    )
    .bind(Utc::now().timestamp_millis())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// `(id, last_error)` for every order in `error`, oldest first.
#[instrument(skip_all)]
pub async fn list_failed_errors(pool: &Pool) -> Result<Vec<(String, Option<String>)>, StoreError> {
    let rows: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT id, last_error FROM orders WHERE status = 'error' ORDER BY created_at ASC")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

/// Delete `synced` orders created before `cutoff`. Other states are never touched.
#[instrument(skip_all)]
pub async fn purge_synced_before(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
    let res = sqlx::query("DELETE FROM orders WHERE status = 'synced' AND created_at < ?")
        .bind(cutoff.timestamp_millis())
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all, fields(tenant_id = %menu.tenant_id))]
pub async fn put_menu(pool: &Pool, menu: &CachedMenu) -> Result<(), StoreError> {
    let categories = to_json("menu", &menu.tenant_id, &menu.categories)?;
    sqlx::query("INSERT OR REPLACE INTO menu_cache (tenant_id, categories, last_updated) VALUES (?, ?, ?)")
        .bind(&menu.tenant_id)
        .bind(categories)
        .bind(menu.last_updated.timestamp_millis())
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_menu(pool: &Pool, tenant_id: &str) -> Result<Option<CachedMenu>, StoreError> {
    let row = sqlx::query_as::<_, MenuRow>(
        "SELECT tenant_id, categories, last_updated FROM menu_cache WHERE tenant_id = ?",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;
    row.map(CachedMenu::try_from).transpose()
}

#[instrument(skip_all, fields(key = key))]
pub async fn set_setting(pool: &Pool, key: &str, value: &str) -> Result<(), StoreError> {
    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all, fields(key = key))]
pub async fn get_setting(pool: &Pool, key: &str) -> Result<Option<String>, StoreError> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn file_urls_are_normalized_and_parent_created() {
        let td = tempfile::tempdir().unwrap();
        let db_path = td.path().join("nested").join("pos.db");
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let rebuilt = prepare_sqlite_url(&url);
        assert_eq!(rebuilt, format!("sqlite://{}?mode=rwc", db_path.display()));
        assert!(td.path().join("nested").is_dir());
    }

    #[test]
    fn latest_migration_matches_schema_version() {
        let latest = MIGRATOR.iter().map(|m| m.version).max().unwrap();
        assert_eq!(latest, crate::db::SCHEMA_VERSION);
    }
}
