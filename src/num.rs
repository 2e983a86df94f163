//! Fixed-point ×10^6 arithmetic and the bucket mapping every index write
//! goes through.
//!
//! All price and money quantities in this crate are carried as signed
//! big-integer ×10^6 fixed point, already scaled on the way in (the chain's
//! ABI ints, or `NUMERIC` columns decoded by `store::pg`). This module never
//! touches floating point and never parses a decimal string of its own —
//! there is no wire format here that hands one to us.

use crate::error::PricingError;
use crate::types::{BucketId, FixedX6};

/// `floor(price_x6 / tick_x6)` using the asset's current tick.
///
/// `tick_x6` is guaranteed `> 0` by the asset table, but the chain could
/// in principle report otherwise; callers must surface `BadTick` rather
/// than panic.
pub fn bucket(price_x6: FixedX6, tick_x6: i64) -> Result<BucketId, PricingError> {
    if tick_x6 <= 0 {
        return Err(PricingError::BadTick(tick_x6));
    }
    Ok((price_x6 as i128).div_euclid(tick_x6 as i128) as BucketId)
}

/// `floor(entry_x6 * lots * lot_num / lot_den)`.
///
/// `entry_x6`, `lots` and `lot_num` are each bounded on their own, but their
/// product isn't; a wide asset (large `lot_num`) paired with a large
/// position can overflow `i128` long before any individual field looks out
/// of range, so the multiplication is checked rather than trusted.
pub fn notional_usd6(entry_x6: i64, lots: i16, lot_num: i64, lot_den: i64) -> Result<i128, PricingError> {
    let numerator = (entry_x6 as i128)
        .checked_mul(lots as i128)
        .and_then(|v| v.checked_mul(lot_num as i128))
        .ok_or_else(|| PricingError::Overflow(format!("notional overflow: entry_x6={entry_x6} lots={lots} lot_num={lot_num}")))?;
    numerator
        .checked_div(lot_den as i128)
        .ok_or_else(|| PricingError::Overflow(format!("notional overflow: lot_den={lot_den}")))
}

/// `floor(notional_usd6 / leverage_x)`.
pub fn margin_usd6(notional_usd6: i128, leverage_x: i16) -> Result<i128, PricingError> {
    notional_usd6
        .checked_div(leverage_x as i128)
        .ok_or_else(|| PricingError::Overflow(format!("margin overflow: leverage_x={leverage_x}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_floors_toward_negative_infinity() {
        assert_eq!(bucket(1_000_000, 100_000).unwrap(), 10);
        assert_eq!(bucket(1_050_000, 100_000).unwrap(), 10);
        assert_eq!(bucket(-50_000, 100_000).unwrap(), -1);
    }

    #[test]
    fn bucket_rejects_non_positive_tick() {
        assert_eq!(bucket(1_000_000, 0).unwrap_err(), PricingError::BadTick(0));
        assert_eq!(
            bucket(1_000_000, -5).unwrap_err(),
            PricingError::BadTick(-5)
        );
    }

    #[test]
    fn notional_and_margin_truncate_toward_zero() {
        let notional = notional_usd6(1_000_000, 3, 1, 2).unwrap();
        assert_eq!(notional, 1_500_000);
        assert_eq!(margin_usd6(notional, 4).unwrap(), 375_000);

        let odd_notional = notional_usd6(1_000_001, 1, 1, 3).unwrap();
        assert_eq!(odd_notional, 333_333);
    }

    #[test]
    fn notional_surfaces_overflow_instead_of_wrapping() {
        assert!(matches!(
            notional_usd6(i64::MAX, i16::MAX, i64::MAX, 1),
            Err(PricingError::Overflow(_))
        ));
    }

    #[test]
    fn margin_surfaces_overflow_on_zero_leverage() {
        assert!(matches!(margin_usd6(1_000_000, 0), Err(PricingError::Overflow(_))));
    }
}
