// Condition-based valuation: a per-type base value scaled by a per-grade
// multiplier.

use crate::model::CoinType;

/// Base value used for types without an entry in the table (including
/// custom and unrecognised types).
pub const DEFAULT_BASE_VALUE: f64 = 10.00;

/// Base value (in dollars, at condition 5) for a coin type.
pub fn base_value(coin_type: &CoinType) -> f64 {
    match coin_type {
        CoinType::Penny => 0.25,
        CoinType::Nickel => 0.50,
        CoinType::Dime => 1.00,
        CoinType::Quarter => 2.00,
        CoinType::HalfDollar => 5.00,
        CoinType::Dollar => 15.00,
        CoinType::SilverDollar => 25.00,
        CoinType::GoldCoin => 150.00,
        CoinType::Custom | CoinType::Other(_) => DEFAULT_BASE_VALUE,
    }
}

/// Value multiplier for a raw condition grade. Anything outside 1..=10 maps
/// to 1.0 rather than being clamped.
pub fn condition_multiplier(condition: i64) -> f64 {
    match condition {
        1 => 0.1,
        2 => 0.25,
        3 => 0.5,
        4 => 0.75,
        5 => 1.0,
        6 => 1.5,
        7 => 2.5,
        8 => 4.0,
        9 => 7.0,
        10 => 15.0,
        _ => 1.0,
    }
}

/// `base_value(type) * condition_multiplier(condition)`.
pub fn condition_value(coin_type: &CoinType, condition: i64) -> f64 {
    base_value(coin_type) * condition_multiplier(condition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_defaults_to_one_outside_range() {
        for c in [i64::MIN, -1, 0, 11, 12, 100, i64::MAX] {
            assert_eq!(condition_multiplier(c), 1.0, "condition {c}");
        }
    }

    #[test]
    fn multiplier_table_is_monotonic() {
        let values: Vec<f64> = (1..=10).map(condition_multiplier).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(values[0], 0.1);
        assert_eq!(values[9], 15.0);
    }

    #[test]
    fn unknown_types_use_default_base() {
        assert_eq!(base_value(&CoinType::Other("Token".into())), DEFAULT_BASE_VALUE);
        assert_eq!(base_value(&CoinType::Custom), DEFAULT_BASE_VALUE);
    }

    #[test]
    fn silver_dollar_in_extra_fine() {
        let v = condition_value(&CoinType::SilverDollar, 7);
        assert!((v - 62.5).abs() < 1e-9);
    }
}
