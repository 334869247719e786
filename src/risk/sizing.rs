use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::models::Side;

/// Exact non-negative ratio `numerator / denominator`
///
/// Built from the shortest decimal form of an `f64`, so `0.1234567` is
/// exactly 1234567 / 10^7 rather than its binary approximation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    numerator: u128,
    denominator: u128,
}

impl Fraction {
    /// `value` taken as a plain ratio, e.g. 0.15
    pub fn from_unit(value: f64) -> Result<Self, OrchestratorError> {
        let invalid = || OrchestratorError::InvalidIntent(format!("{} is not a usable ratio", value));

        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        let decimal = Decimal::from_str(&value.to_string()).map_err(|_| invalid())?;
        let numerator = u128::try_from(decimal.mantissa()).map_err(|_| invalid())?;

        Ok(Self {
            numerator,
            denominator: 10u128.pow(decimal.scale()),
        })
    }

    /// `value` taken as a percentage, e.g. 50.0 is one half
    pub fn from_percent(value: f64) -> Result<Self, OrchestratorError> {
        let unit = Self::from_unit(value)?;
        Ok(Self {
            numerator: unit.numerator,
            denominator: unit.denominator * 100,
        })
    }

    pub fn is_whole(&self) -> bool {
        self.numerator >= self.denominator
    }

    /// `floor(value * self)` without intermediate overflow where avoidable
    pub fn floor_of(&self, value: u128) -> Option<u128> {
        mul_div_floor(value, self.numerator, self.denominator)
    }
}

/// `floor(value * numerator / denominator)`
fn mul_div_floor(value: u128, numerator: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    let whole = value / denominator;
    let rest = value % denominator;
    whole
        .checked_mul(numerator)?
        .checked_add(rest.checked_mul(numerator)? / denominator)
}

/// Fixed budget multiples bounding slippage spend and collateral at risk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservePolicy {
    pub cap_multiple: u32,
    pub margin_multiple: u32,
}

impl Default for ReservePolicy {
    fn default() -> Self {
        Self {
            cap_multiple: 2,    // max spend = 2x budget
            margin_multiple: 5, // margin = 5x budget
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserve {
    pub max_spend_cap: u128,
    pub margin: u128,
}

impl Reserve {
    /// Collateral the wallet should hold before opening
    pub fn required_balance(&self) -> u128 {
        self.max_spend_cap.saturating_add(self.margin)
    }
}

impl ReservePolicy {
    pub fn reserve_for(&self, budget: u128) -> Result<Reserve, OrchestratorError> {
        let overflow = || {
            OrchestratorError::InvalidIntent(format!("budget {} overflows reserve math", budget))
        };
        Ok(Reserve {
            max_spend_cap: budget
                .checked_mul(u128::from(self.cap_multiple))
                .ok_or_else(overflow)?,
            margin: budget
                .checked_mul(u128::from(self.margin_multiple))
                .ok_or_else(overflow)?,
        })
    }
}

/// What to do when the liquidity simulator itself fails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityFallback {
    /// Keep the quoted size and log a warning
    #[default]
    ProceedUnadjusted,
    /// Fail the step
    Abort,
}

/// Stop price `adverse_move` away from `price`, floored.
///
/// Longs stop below the current price, shorts above it.
pub fn target_stop_price(
    side: Side,
    price: u128,
    adverse_move: Fraction,
) -> Result<u128, OrchestratorError> {
    let Fraction {
        numerator,
        denominator,
    } = adverse_move;
    let factor = match side {
        Side::Long => denominator.checked_sub(numerator),
        Side::Short => denominator.checked_add(numerator),
    }
    .ok_or_else(|| {
        OrchestratorError::InvalidIntent(format!(
            "adverse move {}/{} out of range",
            numerator, denominator
        ))
    })?;

    mul_div_floor(price, factor, denominator).ok_or_else(|| {
        OrchestratorError::InvalidIntent(format!("price {} overflows stop math", price))
    })
}

/// Reject an executable stop sitting on the wrong side of the market
pub fn validate_stop_side(
    side: Side,
    current_price: u128,
    executable_price: u128,
) -> Result<(), OrchestratorError> {
    let valid = executable_price > 0
        && match side {
            Side::Long => executable_price < current_price,
            Side::Short => executable_price > current_price,
        };

    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::StopLossNegotiationFailed(format!(
            "executable price {} is on the wrong side of current price {} for a {} stop",
            executable_price, current_price, side
        )))
    }
}

/// Amounts a close will take out of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseSizing {
    pub size: u128,
    pub margin: u128,
    pub full: bool,
}

/// Split a position for a close of `fraction` of it.
///
/// A partial close floors the reduction, so at least one unit always stays
/// open; a reduction that floors to zero is rejected.
pub fn close_sizing(
    size: u128,
    margin: u128,
    fraction: Fraction,
) -> Result<CloseSizing, OrchestratorError> {
    if fraction.is_whole() {
        return Ok(CloseSizing {
            size,
            margin,
            full: true,
        });
    }

    let reduced = fraction.floor_of(size).ok_or_else(|| {
        OrchestratorError::InvalidIntent(format!("size {} overflows close math", size))
    })?;
    if reduced == 0 {
        return Err(OrchestratorError::InvalidIntent(format!(
            "closing {}/{} of size {} rounds to zero",
            fraction.numerator, fraction.denominator, size
        )));
    }

    let margin_released = fraction.floor_of(margin).ok_or_else(|| {
        OrchestratorError::InvalidIntent(format!("margin {} overflows close math", margin))
    })?;

    Ok(CloseSizing {
        size: reduced,
        margin: margin_released,
        full: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_fixed_multiple_of_budget() {
        let policy = ReservePolicy::default();

        for budget in [1u128, 1_000, 1_000_000_000, 987_654_321_987] {
            let reserve = policy.reserve_for(budget).unwrap();
            assert_eq!(reserve.max_spend_cap, budget * 2);
            assert_eq!(reserve.margin, budget * 5);
            assert_eq!(reserve.required_balance(), budget * 7);
        }
    }

    #[test]
    fn test_reserve_overflow_is_rejected() {
        let policy = ReservePolicy::default();
        assert!(policy.reserve_for(u128::MAX).is_err());
    }

    fn unit(value: f64) -> Fraction {
        Fraction::from_unit(value).unwrap()
    }

    fn percent(value: f64) -> Fraction {
        Fraction::from_percent(value).unwrap()
    }

    #[test]
    fn test_long_target_stop() {
        let target = target_stop_price(Side::Long, 1_000_000, unit(0.15)).unwrap();
        assert_eq!(target, 850_000);
    }

    #[test]
    fn test_short_target_stop() {
        let target = target_stop_price(Side::Short, 1_000_000, unit(0.15)).unwrap();
        assert_eq!(target, 1_150_000);
    }

    #[test]
    fn test_target_stop_floors() {
        // 333 * 0.9 = 299.7
        assert_eq!(target_stop_price(Side::Long, 333, unit(0.1)).unwrap(), 299);
        // 333 * 1.1 = 366.3
        assert_eq!(target_stop_price(Side::Short, 333, unit(0.1)).unwrap(), 366);
    }

    #[test]
    fn test_target_stop_keeps_every_decimal_of_the_move() {
        let price = 1_000_000_000_000u128;
        assert_eq!(
            target_stop_price(Side::Long, price, unit(0.1234567)).unwrap(),
            876_543_300_000
        );
        assert_eq!(
            target_stop_price(Side::Short, price, unit(0.1234567)).unwrap(),
            1_123_456_700_000
        );
    }

    #[test]
    fn test_target_stop_beyond_u64_price() {
        let price = u128::from(u64::MAX) * 1_000;
        let target = target_stop_price(Side::Long, price, unit(0.5)).unwrap();
        assert_eq!(target, price / 2);
    }

    #[test]
    fn test_fraction_parsing() {
        assert!(Fraction::from_unit(f64::NAN).is_err());
        assert!(Fraction::from_unit(-0.1).is_err());
        assert!(percent(100.0).is_whole());
        assert!(!percent(99.996).is_whole());
        assert_eq!(percent(50.0).floor_of(1_001), Some(500));
    }

    #[test]
    fn test_stop_side_validation() {
        assert!(validate_stop_side(Side::Long, 1_000_000, 852_000).is_ok());
        assert!(validate_stop_side(Side::Long, 1_000_000, 1_000_000).is_err());
        assert!(validate_stop_side(Side::Long, 1_000_000, 0).is_err());
        assert!(validate_stop_side(Side::Short, 1_000_000, 1_150_000).is_ok());
        assert!(validate_stop_side(Side::Short, 1_000_000, 999_999).is_err());
    }

    #[test]
    fn test_full_close_sizing() {
        let sizing = close_sizing(1_000, 5_000, percent(100.0)).unwrap();
        assert_eq!(
            sizing,
            CloseSizing {
                size: 1_000,
                margin: 5_000,
                full: true
            }
        );
    }

    #[test]
    fn test_half_close_sizing() {
        let sizing = close_sizing(1_001, 5_001, percent(50.0)).unwrap();
        assert_eq!(sizing.size, 500);
        assert_eq!(sizing.margin, 2_500);
        assert!(!sizing.full);
    }

    #[test]
    fn test_near_full_close_stays_partial() {
        let sizing = close_sizing(1_000_000, 5_000_000, percent(99.996)).unwrap();
        assert_eq!(sizing.size, 999_960);
        assert_eq!(sizing.margin, 4_999_800);
        assert!(!sizing.full);

        // 99.99% of 100 floors to 99, leaving 1 unit open
        let sizing = close_sizing(100, 500, percent(99.99)).unwrap();
        assert_eq!(sizing.size, 99);
        assert!(!sizing.full);
    }

    #[test]
    fn test_close_fraction_is_not_rounded() {
        let sizing = close_sizing(1_000_000, 0, percent(33.3333)).unwrap();
        assert_eq!(sizing.size, 333_333);

        let sizing = close_sizing(1_000_000_000_000, 0, percent(0.004)).unwrap();
        assert_eq!(sizing.size, 40_000_000);
    }

    #[test]
    fn test_reduction_flooring_to_zero_is_rejected() {
        assert!(close_sizing(1, 5, percent(50.0)).is_err());
        assert!(close_sizing(1_000, 5, percent(0.004)).is_err());
    }

    #[test]
    fn test_partial_close_law() {
        let size = 1_000_003u128;

        let first = close_sizing(size, 0, percent(50.0)).unwrap();
        let after_first = size - first.size;
        let second = close_sizing(after_first, 0, percent(50.0)).unwrap();
        let after_second = after_first - second.size;

        // Single close at the combined effective fraction (75%), floor per step
        let remaining_single = size - size * 7_500 / 10_000;
        assert!(after_second.abs_diff(remaining_single) <= 1);
    }
}
