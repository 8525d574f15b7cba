// Precious-metal spot prices: the cached price object, the market-page
// scraper that refreshes it, and the fallback tables used when it can't.

use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Metals and price tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metal {
    Gold,
    Silver,
    Platinum,
    Copper,
}

impl Metal {
    pub const ALL: [Metal; 4] = [Metal::Gold, Metal::Silver, Metal::Platinum, Metal::Copper];

    pub fn as_str(self) -> &'static str {
        match self {
            Metal::Gold => "gold",
            Metal::Silver => "silver",
            Metal::Platinum => "platinum",
            Metal::Copper => "copper",
        }
    }
}

impl FromStr for Metal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gold" => Ok(Metal::Gold),
            "silver" => Ok(Metal::Silver),
            "platinum" => Ok(Metal::Platinum),
            "copper" => Ok(Metal::Copper),
            other => Err(format!("unknown metal `{other}`")),
        }
    }
}

/// One price per metal. Units depend on context: the cached market prices
/// quote copper per pound, everything else (and every table handed to the
/// valuation engine) per troy ounce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetalPrices {
    pub gold: f64,
    pub silver: f64,
    pub platinum: f64,
    pub copper: f64,
}

impl MetalPrices {
    pub fn get(&self, metal: Metal) -> f64 {
        match metal {
            Metal::Gold => self.gold,
            Metal::Silver => self.silver,
            Metal::Platinum => self.platinum,
            Metal::Copper => self.copper,
        }
    }
}

/// Stored when a refresh fails. Copper per pound.
pub const FALLBACK_PRICES: MetalPrices = MetalPrices {
    gold: 2050.00,
    silver: 24.50,
    platinum: 980.00,
    copper: 4.15,
};

/// Used by metal valuation when nothing has ever been cached. Per ounce.
pub const ESTIMATED_PRICES: MetalPrices = MetalPrices {
    gold: 2050.50,
    silver: 24.15,
    platinum: 980.25,
    copper: 0.009,
};

/// Scale applied to the cached copper quote before valuation.
pub const COPPER_PRICE_SCALE: f64 = 0.00220462;

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    #[serde(rename = "kitco", alias = "market")]
    Market,
    #[serde(rename = "fallback")]
    Fallback,
}

/// The persisted price object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCache {
    pub prices: MetalPrices,
    pub timestamp: DateTime<Utc>,
    pub source: PriceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PriceCache {
    pub fn fallback(now: DateTime<Utc>, error: impl Into<String>) -> Self {
        PriceCache {
            prices: FALLBACK_PRICES,
            timestamp: now,
            source: PriceSource::Fallback,
            error: Some(error.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == PriceSource::Fallback
    }

    /// Per-ounce prices for metal valuation.
    pub fn per_ounce(&self) -> MetalPrices {
        MetalPrices {
            copper: self.prices.copper * COPPER_PRICE_SCALE,
            ..self.prices
        }
    }

    /// "Just now", "12m ago", "3h ago", with " (fallback)" appended for
    /// fallback data.
    pub fn age_label(&self, now: DateTime<Utc>) -> String {
        let minutes = (now - self.timestamp).num_minutes();
        let mut label = if minutes < 1 {
            "Just now".to_string()
        } else if minutes < 60 {
            format!("{minutes}m ago")
        } else {
            format!("{}h ago", minutes / 60)
        };
        if self.is_fallback() {
            label.push_str(" (fallback)");
        }
        label
    }
}

/// Per-ounce table for valuation: the cache when present, else estimates.
pub fn valuation_prices(cache: Option<&PriceCache>) -> MetalPrices {
    cache.map(PriceCache::per_ounce).unwrap_or(ESTIMATED_PRICES)
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("price request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("price page returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("could not parse prices from page")]
    Unparseable,
}

fn price_pattern(metal: Metal) -> &'static Regex {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        Metal::ALL.map(|m| {
            Regex::new(&format!(r"(?i){}.*?(\d+[.,]\d+)", m.as_str()))
                .expect("static price pattern")
        })
    });
    &patterns[metal as usize]
}

fn extract_price(html: &str, metal: Metal) -> Option<f64> {
    let caps = price_pattern(metal).captures(html)?;
    caps[1].replacen(',', "", 1).parse().ok()
}

/// Pull prices out of a market page. Gold or silver must be present; any
/// metal that is missing takes its fallback value.
pub fn extract_prices(html: &str) -> Result<MetalPrices, PriceError> {
    let gold = extract_price(html, Metal::Gold);
    let silver = extract_price(html, Metal::Silver);
    if gold.is_none() && silver.is_none() {
        return Err(PriceError::Unparseable);
    }

    Ok(MetalPrices {
        gold: gold.unwrap_or(FALLBACK_PRICES.gold),
        silver: silver.unwrap_or(FALLBACK_PRICES.silver),
        platinum: extract_price(html, Metal::Platinum).unwrap_or(FALLBACK_PRICES.platinum),
        copper: extract_price(html, Metal::Copper).unwrap_or(FALLBACK_PRICES.copper),
    })
}

/// Scrapes spot prices from a market page.
pub struct PriceFetcher {
    http: reqwest::Client,
    source_url: String,
}

impl PriceFetcher {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            source_url: source_url.into(),
        }
    }

    pub async fn fetch(&self) -> Result<MetalPrices, PriceError> {
        let response = self.http.get(&self.source_url).send().await?;
        if !response.status().is_success() {
            return Err(PriceError::Status(response.status()));
        }
        let html = response.text().await?;
        extract_prices(&html)
    }

    /// Fetch fresh prices, falling back to the constant table on any error.
    /// Never fails; check `PriceCache::is_fallback` on the result.
    pub async fn refresh(&self) -> PriceCache {
        let now = Utc::now();
        match self.fetch().await {
            Ok(prices) => {
                info!(
                    gold = prices.gold,
                    silver = prices.silver,
                    "metal prices refreshed from {}",
                    self.source_url
                );
                PriceCache {
                    prices,
                    timestamp: now,
                    source: PriceSource::Market,
                    error: None,
                }
            }
            Err(e) => {
                warn!("metal price refresh failed, using fallback prices: {e}");
                PriceCache::fallback(now, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn extracts_prices_from_page_text() {
        let html = "<td>Gold</td><td>2341.10</td><td>Silver</td><td>29.87</td>\
                    <td>Platinum</td><td>1012.50</td>";
        let prices = extract_prices(html).unwrap();
        assert!((prices.gold - 2341.10).abs() < 1e-9);
        assert!((prices.silver - 29.87).abs() < 1e-9);
        assert!((prices.platinum - 1012.50).abs() < 1e-9);
        // copper missing from the page
        assert_eq!(prices.copper, FALLBACK_PRICES.copper);
    }

    #[test]
    fn page_without_gold_or_silver_is_unparseable() {
        let err = extract_prices("<p>Platinum 1012.50 Copper 4.20</p>").unwrap_err();
        assert!(matches!(err, PriceError::Unparseable));
    }

    #[test]
    fn cached_copper_is_scaled_for_valuation() {
        let cache = PriceCache::fallback(Utc::now(), "offline");
        let per_oz = valuation_prices(Some(&cache));
        assert_eq!(per_oz.gold, 2050.00);
        assert!((per_oz.copper - 4.15 * COPPER_PRICE_SCALE).abs() < 1e-12);
    }

    #[test]
    fn estimates_used_without_cache() {
        assert_eq!(valuation_prices(None), ESTIMATED_PRICES);
    }

    #[test]
    fn age_labels() {
        let now = Utc::now();
        let mut cache = PriceCache {
            prices: FALLBACK_PRICES,
            timestamp: now - Duration::seconds(20),
            source: PriceSource::Market,
            error: None,
        };
        assert_eq!(cache.age_label(now), "Just now");

        cache.timestamp = now - Duration::minutes(42);
        assert_eq!(cache.age_label(now), "42m ago");

        cache.timestamp = now - Duration::minutes(185);
        cache.source = PriceSource::Fallback;
        assert_eq!(cache.age_label(now), "3h ago (fallback)");
    }

    #[test]
    fn decodes_browser_cache_object() {
        let raw = r#"{"prices":{"gold":2050,"silver":24.5,"platinum":980,"copper":4.15},
                      "timestamp":"2024-03-01T10:00:00.000Z","source":"fallback",
                      "error":"Failed to fetch"}"#;
        let cache: PriceCache = serde_json::from_str(raw).unwrap();
        assert!(cache.is_fallback());
        assert_eq!(cache.error.as_deref(), Some("Failed to fetch"));
    }
}
