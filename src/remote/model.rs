use rust_decimal::Decimal;
use serde::Deserialize;

use crate::model::{MenuCategory, MenuModifier, MenuOption, MenuProduct};

#[derive(Deserialize, Debug)]
pub struct CategoryRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub products: Vec<ProductRow>,
}

#[derive(Deserialize, Debug)]
pub struct ProductRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub modifiers: Vec<ModifierRow>,
}

#[derive(Deserialize, Debug)]
pub struct ModifierRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub required: bool,
    pub max_selections: Option<i32>,
    #[serde(default)]
    pub modifier_options: Vec<OptionRow>,
}

#[derive(Deserialize, Debug)]
pub struct OptionRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price_diff: Decimal,
}

#[derive(Deserialize, Debug)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

fn default_active() -> bool {
    true
}

impl From<CategoryRow> for MenuCategory {
    fn from(row: CategoryRow) -> Self {
        MenuCategory {
            id: row.id,
            name: row.name,
            sort_order: row.sort_order,
            products: row.products.into_iter().map(MenuProduct::from).collect(),
        }
    }
}

impl From<ProductRow> for MenuProduct {
    fn from(row: ProductRow) -> Self {
        MenuProduct {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            active: row.active,
            modifiers: row.modifiers.into_iter().map(MenuModifier::from).collect(),
        }
    }
}

impl From<ModifierRow> for MenuModifier {
    fn from(row: ModifierRow) -> Self {
        MenuModifier {
            id: row.id,
            name: row.name,
            required: row.required,
            // No cap, or a cap above one, allows several options.
            multiple: row.max_selections.map_or(true, |max| max > 1),
            options: row
                .modifier_options
                .into_iter()
                .map(|o| MenuOption {
                    id: o.id,
                    name: o.name,
                    price_delta: o.price_diff,
                })
                .collect(),
        }
    }
}
