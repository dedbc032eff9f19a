//! Decimal money helpers shared by capture and the remote payload.
//!
//! Every operation is checked: `None` means the amount does not fit.
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Convert an amount in major units into integer minor units (cents).
///
/// Rounds half away from zero, so `45.905` becomes `4591`. Returns `None`
/// when the amount has no `i64` cent representation.
pub fn to_cents(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Clamp a user-entered percentage into `0..=100`.
pub fn clamp_percent(pct: Decimal) -> Decimal {
    pct.max(Decimal::ZERO).min(HUNDRED)
}

fn percent_of(amount: Decimal, pct: Decimal) -> Option<Decimal> {
    amount.checked_mul(pct)?.checked_div(HUNDRED)
}

/// Monetary fields of an order, computed once at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub service_fee: Decimal,
    pub total: Decimal,
}

impl Totals {
    /// `total = max(0, subtotal - discount + service_fee)`; both percentages
    /// apply to the subtotal.
    pub fn compute(
        subtotal: Decimal,
        discount_pct: Decimal,
        service_fee_pct: Decimal,
    ) -> Option<Self> {
        let subtotal = subtotal.max(Decimal::ZERO);
        let discount = percent_of(subtotal, clamp_percent(discount_pct))?;
        let service_fee = percent_of(subtotal, service_fee_pct.max(Decimal::ZERO))?;
        let total = subtotal
            .checked_sub(discount)?
            .checked_add(service_fee)?
            .max(Decimal::ZERO);
        Some(Self {
            subtotal,
            discount,
            service_fee,
            total,
        })
    }
}
