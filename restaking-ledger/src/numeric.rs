//! Shared numeric update primitives
//!
//! Every balance and aggregate in the workspace is changed through these
//! functions. They reject results that would go negative or overflow, so
//! callers can treat a successful return as "the invariant still holds".

use crate::{types::Amount, Error, Result};
use ethnum::I256;
use rust_decimal::Decimal;

/// Apply a signed delta to an amount
///
/// A zero delta is a no-op. Fails with [`Error::NegativeBalance`] if the
/// result would be below zero.
pub fn apply_amount_delta(current: Amount, delta: Amount, field: &str) -> Result<Amount> {
    if delta.is_zero() {
        return Ok(current);
    }

    let updated = current
        .checked_add(delta)
        .ok_or_else(|| Error::Overflow(format!("{}: {} + {}", field, current, delta)))?;

    if updated.is_negative() {
        return Err(Error::NegativeBalance(format!(
            "{}: {} + ({}) is below zero",
            field, current, delta
        )));
    }

    Ok(updated)
}

/// Apply a signed delta to a decimal value
///
/// Same contract as [`apply_amount_delta`] for decimal aggregates.
pub fn apply_value_delta(current: Decimal, delta: Decimal, field: &str) -> Result<Decimal> {
    if delta.is_zero() {
        return Ok(current);
    }

    let updated = current
        .checked_add(delta)
        .ok_or_else(|| Error::Overflow(format!("{}: {} + {}", field, current, delta)))?;

    if updated.is_sign_negative() && !updated.is_zero() {
        return Err(Error::NegativeBalance(format!(
            "{}: {} + ({}) is below zero",
            field, current, delta
        )));
    }

    Ok(updated)
}

/// `floor(amount * factor)` for non-negative inputs
///
/// Splits the amount around the factor's scale so the intermediate product
/// never exceeds the final result by more than the factor's mantissa.
pub fn mul_truncate(amount: Amount, factor: Decimal) -> Result<Amount> {
    if amount.is_negative() || (factor.is_sign_negative() && !factor.is_zero()) {
        return Err(Error::InvalidDelta(format!(
            "mul_truncate expects non-negative inputs, got {} * {}",
            amount, factor
        )));
    }

    let mantissa = I256::new(factor.mantissa());
    let divisor = pow10(factor.scale())?;
    let amount = amount.as_i256();

    let quotient = amount / divisor;
    let remainder = amount % divisor;

    let high = quotient
        .checked_mul(mantissa)
        .ok_or_else(|| Error::Overflow(format!("{} * {}", amount, factor)))?;
    let low = remainder
        .checked_mul(mantissa)
        .ok_or_else(|| Error::Overflow(format!("{} * {}", amount, factor)))?
        / divisor;

    high.checked_add(low)
        .map(Amount::from_i256)
        .ok_or_else(|| Error::Overflow(format!("{} * {}", amount, factor)))
}

fn pow10(exponent: u32) -> Result<I256> {
    let ten = I256::new(10);
    let mut value = I256::new(1);
    for _ in 0..exponent {
        value = value
            .checked_mul(ten)
            .ok_or_else(|| Error::Overflow(format!("10^{}", exponent)))?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    #[test]
    fn test_apply_amount_delta() {
        let current = Amount::from(100);
        assert_eq!(apply_amount_delta(current, Amount::from(-40), "x").unwrap(), Amount::from(60));
        assert_eq!(apply_amount_delta(current, Amount::ZERO, "x").unwrap(), current);
        assert!(matches!(
            apply_amount_delta(current, Amount::from(-101), "x"),
            Err(Error::NegativeBalance(_))
        ));
    }

    #[test]
    fn test_apply_value_delta() {
        let current = Decimal::from_str("1.5").unwrap();
        let updated = apply_value_delta(current, Decimal::from_str("-0.5").unwrap(), "v").unwrap();
        assert_eq!(updated, Decimal::ONE);
        assert!(apply_value_delta(current, Decimal::from(-2), "v").is_err());
        assert!(apply_value_delta(Decimal::MAX, Decimal::MAX, "v").is_err());
    }

    #[test]
    fn test_mul_truncate_floors() {
        let factor = Decimal::from_str("0.75").unwrap();
        assert_eq!(mul_truncate(Amount::from(40), factor).unwrap(), Amount::from(30));

        let third = Decimal::from_str("0.333333333333333333").unwrap();
        assert_eq!(mul_truncate(Amount::from(10), third).unwrap(), Amount::from(3));

        assert_eq!(mul_truncate(Amount::from(7), Decimal::ONE).unwrap(), Amount::from(7));
        assert_eq!(mul_truncate(Amount::from(7), Decimal::ZERO).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_mul_truncate_large_amount() {
        // 2^200 * 0.5 = 2^199
        let large: Amount = "1606938044258990275541962092341162602522202993782792835301376"
            .parse()
            .unwrap();
        let expected: Amount = "803469022129495137770981046170581301261101496891396417650688"
            .parse()
            .unwrap();
        let half = Decimal::from_str("0.5").unwrap();
        assert_eq!(mul_truncate(large, half).unwrap(), expected);
    }

    #[test]
    fn test_mul_truncate_rejects_negative() {
        assert!(mul_truncate(Amount::from(-1), Decimal::ONE).is_err());
        assert!(mul_truncate(Amount::from(1), Decimal::from(-1)).is_err());
    }

    proptest! {
        /// The truncated product never exceeds the amount for factors in [0, 1]
        #[test]
        fn prop_mul_truncate_bounded(amount in 0i64..i64::MAX, bps in 0u32..=10_000u32) {
            let factor = Decimal::new(bps as i64, 4);
            let result = mul_truncate(Amount::from(amount), factor).unwrap();
            prop_assert!(result <= Amount::from(amount));
            prop_assert!(!result.is_negative());
            let expected = (amount as i128 * bps as i128) / 10_000;
            prop_assert_eq!(result, Amount::new(expected));
        }
    }
}
