//! Remote backend contract: order submission and catalog fetch.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::RemoteError;
use crate::model::{Customer, MenuCategory, QueuedOrder};
use crate::money::to_cents;

pub mod model;
pub mod supabase;

pub use supabase::SupabaseClient;

#[async_trait]
pub trait OrderBackend: Send + Sync {
    /// Submit one order. Submitting the same order id twice must be harmless.
    async fn submit_order(&self, order: &OrderPayload) -> Result<(), RemoteError>;

    /// Full category tree for a tenant, ordered by category sort position.
    async fn fetch_catalog(&self, tenant_id: &str) -> Result<Vec<MenuCategory>, RemoteError>;
}

/// Either a usable backend or the reason there is none. Callers match on it
/// instead of discovering misconfiguration on first use.
#[derive(Clone)]
pub enum BackendHandle {
    Configured(Arc<dyn OrderBackend>),
    NotConfigured(String),
}

impl BackendHandle {
    pub fn configured(backend: impl OrderBackend + 'static) -> Self {
        BackendHandle::Configured(Arc::new(backend))
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, BackendHandle::Configured(_))
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendHandle::Configured(_) => f.write_str("Configured(..)"),
            BackendHandle::NotConfigured(reason) => {
                f.debug_tuple("NotConfigured").field(reason).finish()
            }
        }
    }
}

/// Wire shape of an order. Money is in integer cents.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OrderPayload {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub channel: &'static str,
    pub table_number: Option<String>,
    pub customer: Option<Customer>,
    pub items: Vec<ItemPayload>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub service_fee_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ItemPayload {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub notes: Option<String>,
    pub modifiers: Vec<ModifierPayload>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModifierPayload {
    pub modifier_id: String,
    pub options: Vec<OptionPayload>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OptionPayload {
    pub option_id: String,
    pub price_delta_cents: i64,
}

impl TryFrom<&QueuedOrder> for OrderPayload {
    type Error = RemoteError;

    fn try_from(order: &QueuedOrder) -> Result<Self, Self::Error> {
        let cents = |amount: Decimal, field: &'static str| {
            to_cents(amount).ok_or_else(|| RemoteError::Unencodable {
                order_id: order.id.clone(),
                field,
            })
        };

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let mut modifiers = Vec::with_capacity(item.modifiers.len());
            for m in &item.modifiers {
                let options = m
                    .options
                    .iter()
                    .map(|o| -> Result<OptionPayload, RemoteError> {
                        Ok(OptionPayload {
                            option_id: o.option_id.clone(),
                            price_delta_cents: cents(o.price_delta, "price_delta")?,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                modifiers.push(ModifierPayload {
                    modifier_id: m.modifier_id.clone(),
                    options,
                });
            }
            items.push(ItemPayload {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_price_cents: cents(item.unit_price, "unit_price")?,
                notes: item.notes.clone(),
                modifiers,
            });
        }

        Ok(OrderPayload {
            id: order.id.clone(),
            tenant_id: order.tenant_id.clone(),
            store_id: order.store_id.clone(),
            channel: order.channel.as_str(),
            table_number: order.table_number.clone(),
            customer: order.customer.clone(),
            items,
            subtotal_cents: cents(order.subtotal, "subtotal")?,
            discount_cents: cents(order.discount, "discount")?,
            service_fee_cents: cents(order.service_fee, "service_fee")?,
            total_cents: cents(order.total, "total")?,
        })
    }
}
