//! Fixed-point monetary arithmetic.
//!
//! Every monetary field in the engine is a `rust_decimal::Decimal`. A single
//! rounding rule applies: round half-up to two decimal places, and only at
//! the point of persisting a derived total, never on intermediate sums.
//! Recomputing the same inputs therefore always yields identical output.

use rust_decimal::{Decimal, RoundingStrategy};

/// Ledger scale: two decimal places (minor units).
pub const MONEY_SCALE: u32 = 2;

/// Default ledger currency.
pub const DEFAULT_CURRENCY: &str = "XAF";

/// Default VAT rate applied to new invoices (percentage).
pub fn default_vat_rate() -> Decimal {
    Decimal::new(1925, 2)
}

/// Round a monetary value half-up to two decimal places.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Quantities allow three decimal places (fractional hours, part units).
pub fn round_quantity(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
}

/// Apply a percentage rate to an amount. The result is unrounded; round it
/// when (and only when) it is persisted as a derived total.
pub fn multiply_by_rate(amount: Decimal, rate_percent: Decimal) -> Decimal {
    amount * rate_percent / Decimal::ONE_HUNDRED
}

/// Derived figures for one line item: (amount_ht, amount_vat, amount_ttc).
///
/// `amount_vat` is computed from the persisted (rounded) `amount_ht`, and
/// `amount_ttc` is the exact sum of the two rounded figures, so
/// `amount_ht + amount_vat == amount_ttc` holds without tolerance.
pub fn line_amounts(quantity: Decimal, unit_price: Decimal, vat_rate: Decimal) -> (Decimal, Decimal, Decimal) {
    let amount_ht = round_money(quantity * unit_price);
    let amount_vat = round_money(multiply_by_rate(amount_ht, vat_rate));
    let amount_ttc = amount_ht + amount_vat;
    (amount_ht, amount_vat, amount_ttc)
}

/// Whether an invoice is fully settled: exact comparison, no float tolerance.
pub fn is_settled(amount_paid: Decimal, amount_ttc: Decimal) -> bool {
    amount_paid >= amount_ttc
}
