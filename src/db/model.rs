//! Row models returned by the repository and their decoding into domain types.
//!
//! Keep these structs focused on the data returned by queries. Nested order
//! data (items, customer) and menu trees are stored as JSON text, money as
//! decimal strings, timestamps as unix milliseconds.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::model::{
    CachedMenu, Channel, Customer, LineItem, MenuCategory, OrderSyncState, QueuedOrder,
};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub channel: String,
    pub table_number: Option<String>,
    pub customer: Option<String>,
    pub items: String,
    pub subtotal: String,
    pub discount: String,
    pub service_fee: String,
    pub total: String,
    pub status: String,
    pub sync_attempts: i64,
    pub created_at: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MenuRow {
    pub tenant_id: String,
    pub categories: String,
    pub last_updated: i64,
}

fn malformed(kind: &'static str, key: &str, detail: impl ToString) -> StoreError {
    StoreError::Malformed {
        kind,
        key: key.to_string(),
        detail: detail.to_string(),
    }
}

pub(crate) fn millis_to_datetime(
    kind: &'static str,
    key: &str,
    ms: i64,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| malformed(kind, key, format!("timestamp {} out of range", ms)))
}

fn decimal(key: &str, field: &str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|err| malformed("order", key, format!("{}: {}", field, err)))
}

impl TryFrom<OrderRow> for QueuedOrder {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let key = row.id.as_str();
        let channel = Channel::parse_channel(&row.channel)
            .ok_or_else(|| malformed("order", key, format!("unknown channel {}", row.channel)))?;
        let status = OrderSyncState::parse_state(&row.status)
            .ok_or_else(|| malformed("order", key, format!("unknown status {}", row.status)))?;
        let items: Vec<LineItem> =
            serde_json::from_str(&row.items).map_err(|err| malformed("order", key, err))?;
        let customer: Option<Customer> = row
            .customer
            .as_deref()
            .map(|raw| serde_json::from_str::<Customer>(raw))
            .transpose()
            .map_err(|err| malformed("order", key, err))?;

        Ok(QueuedOrder {
            subtotal: decimal(key, "subtotal", &row.subtotal)?,
            discount: decimal(key, "discount", &row.discount)?,
            service_fee: decimal(key, "service_fee", &row.service_fee)?,
            total: decimal(key, "total", &row.total)?,
            sync_attempts: u32::try_from(row.sync_attempts.max(0)).unwrap_or(u32::MAX),
            created_at: millis_to_datetime("order", key, row.created_at)?,
            channel,
            status,
            items,
            customer,
            id: row.id,
            tenant_id: row.tenant_id,
            store_id: row.store_id,
            table_number: row.table_number,
            last_error: row.last_error,
        })
    }
}

impl TryFrom<MenuRow> for CachedMenu {
    type Error = StoreError;

    fn try_from(row: MenuRow) -> Result<Self, Self::Error> {
        let categories: Vec<MenuCategory> = serde_json::from_str(&row.categories)
            .map_err(|err| malformed("menu", &row.tenant_id, err))?;
        Ok(CachedMenu {
            last_updated: millis_to_datetime("menu", &row.tenant_id, row.last_updated)?,
            tenant_id: row.tenant_id,
            categories,
        })
    }
}
