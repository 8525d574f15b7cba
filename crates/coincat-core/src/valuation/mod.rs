// Valuation engine: four independent strategies that each turn a coin's
// declared attributes into a `Valuation`.

pub mod condition;
pub mod metallurgy;

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::model::{CoinType, Valuation, ValuationSource};
use crate::prices::{valuation_prices, PriceCache};

pub use condition::{base_value, condition_multiplier, condition_value};
pub use metallurgy::{parse_metallurgy, MetalContent};

/// Default artificial delay of the simulated catalogue lookup.
pub const DEFAULT_LOOKUP_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Error, PartialEq)]
pub enum ValuationError {
    #[error("select a coin type first")]
    MissingType,

    #[error("enter coin type and year first")]
    MissingTypeOrYear,

    #[error("enter metallurgy information first")]
    MissingMetallurgy,

    #[error("could not parse metallurgy `{0}`; expected a form like '90% silver, 6.25g'")]
    UnparseableMetallurgy(String),

    #[error("enter a value greater than zero")]
    NoManualValue,

    #[error("valuation must not be negative, got {0}")]
    NegativeValue(f64),
}

/// Which strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Manual,
    Condition,
    Metal,
    Lookup,
}

impl Strategy {
    /// Source tag the strategy stamps on its result.
    pub fn source(self) -> ValuationSource {
        match self {
            Strategy::Manual => ValuationSource::Manual,
            Strategy::Condition => ValuationSource::Condition,
            Strategy::Metal => ValuationSource::Metal,
            Strategy::Lookup => ValuationSource::Numista,
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Strategy::Manual),
            "condition" => Ok(Strategy::Condition),
            "metal" => Ok(Strategy::Metal),
            "numista" | "lookup" => Ok(Strategy::Lookup),
            other => Err(format!(
                "unknown valuation strategy `{other}` (expected manual, condition, metal or numista)"
            )),
        }
    }
}

/// The attributes a strategy may read. `condition` is the raw grade as
/// entered; out-of-range grades are valued at multiplier 1.0.
#[derive(Debug, Clone, Copy)]
pub struct ValuationInput<'a> {
    pub coin_type: Option<&'a CoinType>,
    pub year: Option<i32>,
    pub condition: i64,
    pub metallurgy: &'a str,
    pub manual_value: f64,
}

/// Runs valuation strategies. Holds only the simulated lookup's delay.
#[derive(Debug, Clone)]
pub struct ValuationEngine {
    lookup_delay: Duration,
}

impl Default for ValuationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_DELAY)
    }
}

impl ValuationEngine {
    pub fn new(lookup_delay: Duration) -> Self {
        Self { lookup_delay }
    }

    /// The user-entered value. Zero means "nothing entered".
    pub fn manual(&self, value: f64) -> Result<Valuation, ValuationError> {
        if value < 0.0 {
            return Err(ValuationError::NegativeValue(value));
        }
        if value == 0.0 || !value.is_finite() {
            return Err(ValuationError::NoManualValue);
        }
        Ok(stamp(value, ValuationSource::Manual))
    }

    pub fn condition_based(&self, input: &ValuationInput<'_>) -> Result<Valuation, ValuationError> {
        let coin_type = input.coin_type.ok_or(ValuationError::MissingType)?;
        let value = condition_value(coin_type, input.condition);
        Ok(stamp(value, ValuationSource::Condition))
    }

    /// Melt value of the metallurgy string, priced from `prices` (or the
    /// built-in estimates when nothing is cached).
    pub fn metal_content(
        &self,
        input: &ValuationInput<'_>,
        prices: Option<&PriceCache>,
    ) -> Result<Valuation, ValuationError> {
        let text = input.metallurgy.trim();
        if text.is_empty() {
            return Err(ValuationError::MissingMetallurgy);
        }
        let content = parse_metallurgy(text)
            .ok_or_else(|| ValuationError::UnparseableMetallurgy(text.to_string()))?;
        let table = valuation_prices(prices);
        let value = content.melt_value(&table);
        debug!(
            metal = content.metal.as_str(),
            purity = content.purity,
            weight = content.weight,
            value,
            "metal valuation"
        );
        Ok(stamp(value, ValuationSource::Metal))
    }

    /// Stand-in for a remote catalogue lookup: the condition formula after an
    /// artificial delay, tagged "numista".
    pub async fn lookup(&self, input: &ValuationInput<'_>) -> Result<Valuation, ValuationError> {
        let coin_type = match (input.coin_type, input.year) {
            (Some(t), Some(_)) => t,
            _ => return Err(ValuationError::MissingTypeOrYear),
        };
        tokio::time::sleep(self.lookup_delay).await;
        let value = condition_value(coin_type, input.condition);
        Ok(stamp(value, ValuationSource::Numista))
    }

    pub async fn appraise(
        &self,
        strategy: Strategy,
        input: &ValuationInput<'_>,
        prices: Option<&PriceCache>,
    ) -> Result<Valuation, ValuationError> {
        match strategy {
            Strategy::Manual => self.manual(input.manual_value),
            Strategy::Condition => self.condition_based(input),
            Strategy::Metal => self.metal_content(input, prices),
            Strategy::Lookup => self.lookup(input).await,
        }
    }
}

fn stamp(value: f64, source: ValuationSource) -> Valuation {
    Valuation {
        value,
        source,
        timestamp: Utc::now(),
    }
}
