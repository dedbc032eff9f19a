use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sales context of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    DineIn,
    Takeout,
    Delivery,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::DineIn => "dine_in",
            Channel::Takeout => "takeout",
            Channel::Delivery => "delivery",
        }
    }

    pub fn parse_channel(s: &str) -> Option<Self> {
        match s {
            "dine_in" => Some(Channel::DineIn),
            "takeout" => Some(Channel::Takeout),
            "delivery" => Some(Channel::Delivery),
            _ => None,
        }
    }
}

/// Where a queued order sits in the sync state machine.
///
/// `PendingSync -> Syncing -> Synced | Error`, or `Syncing -> PendingSync`
/// while attempts remain. Nothing leaves `Synced` or `Error` automatically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderSyncState {
    PendingSync,
    Syncing,
    Synced,
    Error,
}

impl OrderSyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSyncState::PendingSync => "pending_sync",
            OrderSyncState::Syncing => "syncing",
            OrderSyncState::Synced => "synced",
            OrderSyncState::Error => "error",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "pending_sync" => Some(OrderSyncState::PendingSync),
            "syncing" => Some(OrderSyncState::Syncing),
            "synced" => Some(OrderSyncState::Synced),
            "error" => Some(OrderSyncState::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedOption {
    pub option_id: String,
    pub option_name: String,
    pub price_delta: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModifierSelection {
    pub modifier_id: String,
    pub modifier_name: String,
    pub options: Vec<SelectedOption>,
}

/// One cart line. Name and prices are snapshots taken at capture time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub notes: Option<String>,
    #[serde(default)]
    pub modifiers: Vec<ModifierSelection>,
}

impl LineItem {
    /// Unit price plus every selected option delta, times quantity. `None`
    /// on overflow.
    pub fn line_total(&self) -> Option<Decimal> {
        let unit = self
            .modifiers
            .iter()
            .flat_map(|m| m.options.iter())
            .try_fold(self.unit_price, |acc, o| acc.checked_add(o.price_delta))?;
        unit.checked_mul(Decimal::from(self.quantity))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedOrder {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub channel: Channel,
    pub table_number: Option<String>,
    pub customer: Option<Customer>,
    pub items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub service_fee: Decimal,
    pub total: Decimal,
    pub status: OrderSyncState,
    pub sync_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuOption {
    pub id: String,
    pub name: String,
    pub price_delta: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuModifier {
    pub id: String,
    pub name: String,
    pub required: bool,
    pub multiple: bool,
    pub options: Vec<MenuOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuProduct {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub active: bool,
    pub modifiers: Vec<MenuModifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuCategory {
    pub id: String,
    pub name: String,
    pub sort_order: i32,
    pub products: Vec<MenuProduct>,
}

/// Per-tenant catalog snapshot used when the backend is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedMenu {
    pub tenant_id: String,
    pub categories: Vec<MenuCategory>,
    pub last_updated: DateTime<Utc>,
}

/// Aggregate sync state broadcast to subscribers. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_online: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_orders: u64,
    pub is_syncing: bool,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn states_parse_back_from_storage_names() {
        for state in [
            OrderSyncState::PendingSync,
            OrderSyncState::Syncing,
            OrderSyncState::Synced,
            OrderSyncState::Error,
        ] {
            assert_eq!(OrderSyncState::parse_state(state.as_str()), Some(state));
        }
        assert_eq!(OrderSyncState::parse_state("SYNCED"), None);
        assert_eq!(Channel::parse_channel("takeout"), Some(Channel::Takeout));
        assert_eq!(Channel::parse_channel("drive_thru"), None);
    }

    #[test]
    fn line_total_includes_option_deltas() {
        let item = LineItem {
            product_id: "p1".into(),
            product_name: "Smash Burger".into(),
            quantity: 2,
            unit_price: dec("25.90"),
            notes: None,
            modifiers: vec![ModifierSelection {
                modifier_id: "m1".into(),
                modifier_name: "Extras".into(),
                options: vec![
                    SelectedOption {
                        option_id: "o1".into(),
                        option_name: "Bacon".into(),
                        price_delta: dec("4.50"),
                    },
                    SelectedOption {
                        option_id: "o2".into(),
                        option_name: "No onion".into(),
                        price_delta: dec("0"),
                    },
                ],
            }],
        };
        assert_eq!(item.line_total(), Some(dec("60.80")));

        let huge = LineItem {
            unit_price: Decimal::MAX,
            ..item
        };
        assert_eq!(huge.line_total(), None);
    }

    #[test]
    fn channel_serializes_snake_case() {
        let json = serde_json::to_string(&Channel::DineIn).unwrap();
        assert_eq!(json, "\"dine_in\"");
        let state: OrderSyncState = serde_json::from_str("\"pending_sync\"").unwrap();
        assert_eq!(state, OrderSyncState::PendingSync);
    }
}
