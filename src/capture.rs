//! Order intake: validate a draft built by a till UI and freeze it into a
//! `QueuedOrder`.
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CaptureError, RemoteError};
use crate::model::{Channel, Customer, LineItem, OrderSyncState, QueuedOrder};
use crate::money::Totals;
use crate::remote::OrderPayload;

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9(][0-9 ()\-]{6,18}[0-9]$").expect("phone pattern"));
static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-]{0,7}$").expect("table pattern"));

/// Checkout as the till submits it. Prices and names are already snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderDraft {
    pub tenant_id: String,
    pub store_id: String,
    pub channel: Channel,
    #[serde(default)]
    pub table_number: Option<String>,
    #[serde(default)]
    pub customer: Option<Customer>,
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub discount_percent: Decimal,
}

fn non_empty(value: &str, field: &'static str) -> Result<(), CaptureError> {
    if value.trim().is_empty() {
        return Err(CaptureError::MissingField(field));
    }
    Ok(())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_items(items: &[LineItem]) -> Result<(), CaptureError> {
    if items.is_empty() {
        return Err(CaptureError::EmptyOrder);
    }
    for item in items {
        non_empty(&item.product_id, "items.product_id")?;
        non_empty(&item.product_name, "items.product_name")?;
        if item.quantity == 0 {
            return Err(CaptureError::ZeroQuantity {
                product_id: item.product_id.clone(),
            });
        }
        let missing_option = item
            .modifiers
            .iter()
            .flat_map(|m| m.options.iter())
            .any(|o| o.option_id.trim().is_empty());
        if missing_option {
            return Err(CaptureError::MissingField("items.modifiers.option_id"));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(CaptureError::NegativePrice {
                product_id: item.product_id.clone(),
            });
        }
        let line_total = item
            .line_total()
            .ok_or(CaptureError::AmountOutOfRange("items.line_total"))?;
        // Option deltas may be negative ("no cheese"), but never below the base price.
        if line_total < Decimal::ZERO {
            return Err(CaptureError::NegativePrice {
                product_id: item.product_id.clone(),
            });
        }
    }
    Ok(())
}

fn normalize_customer(customer: Option<Customer>) -> Result<Option<Customer>, CaptureError> {
    let Some(customer) = customer else {
        return Ok(None);
    };
    let customer = Customer {
        name: trimmed(customer.name),
        phone: trimmed(customer.phone),
        address: trimmed(customer.address),
    };
    if let Some(phone) = &customer.phone {
        if !PHONE_RE.is_match(phone) {
            return Err(CaptureError::InvalidPhone(phone.clone()));
        }
    }
    if customer == Customer::default() {
        return Ok(None);
    }
    Ok(Some(customer))
}

/// Validate `draft` and freeze it into a new `pending_sync` order.
///
/// `service_fee_percent` applies to dine-in orders only; the discount percent
/// is clamped into `0..=100`. Table numbers are kept for dine-in only.
pub fn build_order(
    draft: OrderDraft,
    service_fee_percent: Decimal,
) -> Result<QueuedOrder, CaptureError> {
    non_empty(&draft.tenant_id, "tenant_id")?;
    non_empty(&draft.store_id, "store_id")?;
    validate_items(&draft.items)?;

    let table_number = match draft.channel {
        Channel::DineIn => {
            let table = trimmed(draft.table_number).ok_or(CaptureError::MissingTable)?;
            if !TABLE_RE.is_match(&table) {
                return Err(CaptureError::InvalidTable(table));
            }
            Some(table)
        }
        Channel::Takeout | Channel::Delivery => None,
    };
    let customer = normalize_customer(draft.customer)?;

    let subtotal = draft
        .items
        .iter()
        .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.line_total()?))
        .ok_or(CaptureError::AmountOutOfRange("subtotal"))?;
    let fee_pct = match draft.channel {
        Channel::DineIn => service_fee_percent,
        _ => Decimal::ZERO,
    };
    let totals = Totals::compute(subtotal, draft.discount_percent, fee_pct)
        .ok_or(CaptureError::AmountOutOfRange("total"))?;

    let order = QueuedOrder {
        id: Uuid::new_v4().to_string(),
        tenant_id: draft.tenant_id.trim().to_string(),
        store_id: draft.store_id.trim().to_string(),
        channel: draft.channel,
        table_number,
        customer,
        items: draft.items,
        subtotal: totals.subtotal,
        discount: totals.discount,
        service_fee: totals.service_fee,
        total: totals.total,
        status: OrderSyncState::PendingSync,
        sync_attempts: 0,
        created_at: Utc::now(),
        last_error: None,
    };
    // Anything accepted here must also fit the wire format in cents.
    if let Err(err) = OrderPayload::try_from(&order) {
        return Err(CaptureError::AmountOutOfRange(match err {
            RemoteError::Unencodable { field, .. } => field,
            _ => "order",
        }));
    }
    Ok(order)
}
