// Coin records and the types they are built from.
//
// The serialized shape (camelCase keys, RFC 3339 timestamps, empty strings for
// absent photos) is the format stored under the collection key and pushed to
// the remote tree, so field renames here are format changes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Coin identifier: milliseconds since the Unix epoch at creation time,
/// bumped when needed to stay unique (see `Collection::next_id`).
pub type CoinId = i64;

// ---------------------------------------------------------------------------
// Coin type
// ---------------------------------------------------------------------------

/// Denomination of a coin. `Custom` is the "Custom Coin" entry whose display
/// name comes from the record's custom name; `Other` keeps any label read
/// back from storage that is not one of the known types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoinType {
    Penny,
    Nickel,
    Dime,
    Quarter,
    HalfDollar,
    Dollar,
    SilverDollar,
    GoldCoin,
    Custom,
    Other(String),
}

impl CoinType {
    /// All selectable types, in menu order.
    pub const KNOWN: [CoinType; 9] = [
        CoinType::Penny,
        CoinType::Nickel,
        CoinType::Dime,
        CoinType::Quarter,
        CoinType::HalfDollar,
        CoinType::Dollar,
        CoinType::SilverDollar,
        CoinType::GoldCoin,
        CoinType::Custom,
    ];

    pub fn label(&self) -> &str {
        match self {
            CoinType::Penny => "Penny",
            CoinType::Nickel => "Nickel",
            CoinType::Dime => "Dime",
            CoinType::Quarter => "Quarter",
            CoinType::HalfDollar => "Half Dollar",
            CoinType::Dollar => "Dollar",
            CoinType::SilverDollar => "Silver Dollar",
            CoinType::GoldCoin => "Gold Coin",
            CoinType::Custom => "Custom Coin",
            CoinType::Other(label) => label,
        }
    }

    /// Parse a type label. Matching is exact, like the stored values; unknown
    /// labels become `Other`.
    pub fn from_label(label: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|t| t.label() == label)
            .cloned()
            .unwrap_or_else(|| CoinType::Other(label.to_string()))
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// Numismatic grade on a 1–10 scale. Construction always clamps into range,
/// including when decoding stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Condition(u8);

impl Condition {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    const GRADES: [&'static str; 10] = [
        "Poor",
        "Fair",
        "Good",
        "Very Good",
        "Fine",
        "Very Fine",
        "Extra Fine",
        "About Uncirculated",
        "Uncirculated",
        "Mint",
    ];

    pub fn new(value: i64) -> Self {
        Condition(value.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Grade name, e.g. "Extra Fine" for 7.
    pub fn grade(self) -> &'static str {
        Self::GRADES[(self.0 - 1) as usize]
    }

    /// Label as shown next to the condition slider: `"Fine (5/10)"`.
    pub fn label(self) -> String {
        format!("{} ({}/10)", self.grade(), self.0)
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition(5)
    }
}

impl From<i64> for Condition {
    fn from(value: i64) -> Self {
        Condition::new(value)
    }
}

impl From<Condition> for u8 {
    fn from(c: Condition) -> Self {
        c.0
    }
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

/// How a valuation was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationSource {
    Manual,
    Numista,
    Metal,
    Condition,
}

impl ValuationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ValuationSource::Manual => "manual",
            ValuationSource::Numista => "numista",
            ValuationSource::Metal => "metal",
            ValuationSource::Condition => "condition",
        }
    }
}

impl fmt::Display for ValuationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValuationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(ValuationSource::Manual),
            "numista" => Ok(ValuationSource::Numista),
            "metal" => Ok(ValuationSource::Metal),
            "condition" => Ok(ValuationSource::Condition),
            other => Err(format!("unknown valuation source `{other}`")),
        }
    }
}

/// A monetary estimate attached to a coin. `value` is never negative; stored
/// records with a negative value fail to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawValuation", rename_all = "camelCase")]
pub struct Valuation {
    #[serde(rename = "currentValue")]
    pub value: f64,
    pub source: ValuationSource,
    #[serde(rename = "lastUpdated")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawValuation {
    current_value: f64,
    source: ValuationSource,
    #[serde(default)]
    last_updated: DateTime<Utc>,
}

impl TryFrom<RawValuation> for Valuation {
    type Error = String;

    fn try_from(raw: RawValuation) -> Result<Self, Self::Error> {
        if !raw.current_value.is_finite() || raw.current_value < 0.0 {
            return Err(format!("invalid valuation value {}", raw.current_value));
        }
        Ok(Valuation {
            value: raw.current_value,
            source: raw.source,
            timestamp: raw.last_updated,
        })
    }
}

// ---------------------------------------------------------------------------
// Coin
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coin {
    pub id: CoinId,
    #[serde(rename = "type", default, with = "optional_type")]
    pub coin_type: Option<CoinType>,
    #[serde(default)]
    pub custom_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub year: i32,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub metallurgy: String,
    #[serde(default, with = "optional_blob")]
    pub photo_front: Option<String>,
    #[serde(default, with = "optional_blob")]
    pub photo_back: Option<String>,
    #[serde(default)]
    pub qr_code: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valuation: Option<Valuation>,
}

impl Coin {
    /// Name shown for a coin: the custom name for a "Custom Coin" that has
    /// one, otherwise the type label, otherwise "Coin".
    pub fn display_name_for(coin_type: Option<&CoinType>, custom_name: &str) -> String {
        match coin_type {
            Some(CoinType::Custom) if !custom_name.is_empty() => custom_name.to_string(),
            Some(t) if !t.label().is_empty() => t.label().to_string(),
            _ => "Coin".to_string(),
        }
    }

    pub fn type_label(&self) -> &str {
        self.coin_type.as_ref().map(CoinType::label).unwrap_or("")
    }

    /// The year as text; empty when no year was recorded.
    pub fn year_label(&self) -> String {
        if self.year == 0 {
            String::new()
        } else {
            self.year.to_string()
        }
    }

    /// Current value, or 0 for unvalued coins.
    pub fn current_value(&self) -> f64 {
        self.valuation.as_ref().map(|v| v.value).unwrap_or(0.0)
    }

    /// Text the collection search matches against.
    pub fn search_blob(&self) -> String {
        [
            self.display_name.as_str(),
            self.type_label(),
            self.custom_name.as_str(),
            &self.year_label(),
            self.metallurgy.as_str(),
            self.notes.as_str(),
            self.qr_code.as_str(),
        ]
        .join(" ")
    }
}

/// Empty string on the wire means "no type selected".
mod optional_type {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<CoinType>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_ref().map(CoinType::label).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<CoinType>, D::Error> {
        let label: Option<String> = Option::deserialize(d)?;
        Ok(label
            .filter(|l| !l.is_empty())
            .map(|l| CoinType::from_label(&l)))
    }
}

/// Empty string on the wire means "no photo".
mod optional_blob {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let blob: Option<String> = Option::deserialize(d)?;
        Ok(blob.filter(|b| !b.is_empty()))
    }
}
