//! Money Formatting
//!
//! Amounts are carried as [`rust_decimal::Decimal`] and rendered to exactly
//! two decimal places before any transmission to the gateway or backend.

use rust_decimal::{Decimal, RoundingStrategy};

/// Format an amount to two decimal places for the wire (`250` -> `"250.00"`).
/// Midpoints round away from zero, matching how the gateway displays totals.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn whole_amounts_gain_two_decimals() {
        assert_eq!(format_amount(dec!(250)), "250.00");
        assert_eq!(format_amount(dec!(250.00)), "250.00");
    }

    #[test]
    fn extra_precision_is_rounded() {
        assert_eq!(format_amount(dec!(99.999)), "100.00");
        assert_eq!(format_amount(dec!(10.5)), "10.50");
    }

    #[test]
    fn midpoints_round_away_from_zero() {
        assert_eq!(format_amount(dec!(0.125)), "0.13");
        assert_eq!(format_amount(dec!(10.005)), "10.01");
        assert_eq!(format_amount(dec!(-0.125)), "-0.13");
    }
}
