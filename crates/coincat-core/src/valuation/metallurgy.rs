// Metallurgy string parsing and metal-content valuation.
//
// Accepts the two orders people actually type: "90% silver, 6.25g" and
// "6.25g 90% silver". Anything else is not a metallurgy string we can price.

use std::sync::OnceLock;

use regex::Regex;

use crate::prices::{Metal, MetalPrices};

/// Grams per troy ounce.
pub const GRAMS_PER_TROY_OUNCE: f64 = 31.1035;

/// Parsed composition: purity in percent, metal, and total weight in grams.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetalContent {
    pub purity: f64,
    pub metal: Metal,
    pub weight: f64,
}

impl MetalContent {
    /// Troy ounces of pure metal.
    pub fn pure_ounces(&self) -> f64 {
        (self.weight / GRAMS_PER_TROY_OUNCE) * (self.purity / 100.0)
    }

    /// Melt value at the given per-ounce price table.
    pub fn melt_value(&self, prices: &MetalPrices) -> f64 {
        self.pure_ounces() * prices.get(self.metal)
    }
}

fn purity_first() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)%\s*(silver|gold|platinum|copper)[^\d]*(\d+(?:\.\d+)?)\s*g")
            .expect("static metallurgy pattern")
    })
}

fn weight_first() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*g[^\d]*(\d+(?:\.\d+)?)%\s*(silver|gold|platinum|copper)")
            .expect("static metallurgy pattern")
    })
}

/// Parse a metallurgy description. Returns `None` when neither accepted
/// token order matches.
pub fn parse_metallurgy(text: &str) -> Option<MetalContent> {
    if let Some(caps) = purity_first().captures(text) {
        return Some(MetalContent {
            purity: caps[1].parse().ok()?,
            metal: caps[2].parse().ok()?,
            weight: caps[3].parse().ok()?,
        });
    }

    if let Some(caps) = weight_first().captures(text) {
        return Some(MetalContent {
            weight: caps[1].parse().ok()?,
            purity: caps[2].parse().ok()?,
            metal: caps[3].parse().ok()?,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_purity_first() {
        let parsed = parse_metallurgy("90% silver, 6.25g").unwrap();
        assert_eq!(
            parsed,
            MetalContent {
                purity: 90.0,
                metal: Metal::Silver,
                weight: 6.25
            }
        );
    }

    #[test]
    fn parses_weight_first_identically() {
        assert_eq!(
            parse_metallurgy("6.25g 90% silver"),
            parse_metallurgy("90% silver, 6.25g")
        );
    }

    #[test]
    fn parsing_is_case_insensitive() {
        let parsed = parse_metallurgy("91.67% GOLD 8.36 g").unwrap();
        assert_eq!(parsed.metal, Metal::Gold);
        assert!((parsed.purity - 91.67).abs() < 1e-9);
        assert!((parsed.weight - 8.36).abs() < 1e-9);
    }

    #[test]
    fn rejects_unparseable_strings() {
        assert!(parse_metallurgy("").is_none());
        assert!(parse_metallurgy("copper-nickel clad").is_none());
        assert!(parse_metallurgy("90% silver").is_none());
        assert!(parse_metallurgy("6.25g of tin").is_none());
        assert!(parse_metallurgy("75% nickel, 5g").is_none());
    }

    #[test]
    fn melt_value_of_a_silver_dime() {
        let dime = parse_metallurgy("90% silver, 2.5g").unwrap();
        let prices = MetalPrices {
            gold: 2000.0,
            silver: 31.1035,
            platinum: 900.0,
            copper: 0.01,
        };
        // 2.5g / 31.1035 * 0.9 * 31.1035 = 2.25
        assert!((dime.melt_value(&prices) - 2.25).abs() < 1e-9);
    }
}
