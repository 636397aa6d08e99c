//! Amount helpers. Balances and prices are held in major currency units as
//! `BigDecimal`; the gateway speaks minor units (kobo), so conversion happens
//! only at the adapter boundary.

use bigdecimal::{BigDecimal, ToPrimitive};

use crate::error::AppError;

/// Truncate to two decimal places without rounding. Commission amounts keep
/// the fraction the marketplace actually collects, never more.
pub fn truncate_2dp(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale(2)
}

/// Commission owed on `total` at `percent` (e.g. 5 for 5%), truncated to 2dp.
pub fn commission_for(total: &BigDecimal, percent: &BigDecimal) -> BigDecimal {
    truncate_2dp(&(total * percent / BigDecimal::from(100)))
}

/// Convert a major-unit amount to integral minor units for the gateway.
/// Rejects amounts with sub-minor-unit precision rather than silently
/// truncating money at the wire boundary.
pub fn to_minor_units(amount: &BigDecimal) -> Result<i64, AppError> {
    let minor = amount * BigDecimal::from(100);
    let truncated = minor.with_scale(0);
    if truncated != minor {
        return Err(AppError::Validation(format!(
            "amount {amount} has sub-minor-unit precision"
        )));
    }
    truncated
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("amount {amount} out of range")))
}

/// Minor units back to a major-unit `BigDecimal`.
pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::new(minor.into(), 2)
}

/// Guard used before any mutation: amounts entering the engine must be
/// strictly positive.
pub fn require_positive(amount: &BigDecimal, what: &str) -> Result<(), AppError> {
    if amount <= &BigDecimal::from(0) {
        return Err(AppError::Validation(format!("{what} must be positive")));
    }
    Ok(())
}
