// The add/edit form and the edit session staged alongside it.

use thiserror::Error;

use coincat_core::model::{Coin, CoinId, CoinType, Valuation, ValuationSource};
use coincat_core::valuation::ValuationInput;

/// Earliest and latest accepted years.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1000..=2100;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("select a coin type or enter a custom name")]
    MissingTypeOrName,

    #[error("enter a valid year between 1000 and 2100")]
    InvalidYear,

    #[error("coin {0} not found")]
    NotFound(CoinId),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Field values of the add/edit form.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinForm {
    pub coin_type: Option<CoinType>,
    pub custom_name: String,
    pub year: Option<i32>,
    pub condition: i64,
    pub notes: String,
    pub metallurgy: String,
    /// Manual value field. Zero or less means "not entered".
    pub manual_value: f64,
    /// Source tag used when the manual value is committed.
    pub value_source: ValuationSource,
}

impl Default for CoinForm {
    fn default() -> Self {
        Self {
            coin_type: None,
            custom_name: String::new(),
            year: None,
            condition: 5,
            notes: String::new(),
            metallurgy: String::new(),
            manual_value: 0.0,
            value_source: ValuationSource::Manual,
        }
    }
}

impl CoinForm {
    /// Form pre-filled from a stored coin, as when opening it for editing.
    pub fn from_coin(coin: &Coin) -> Self {
        Self {
            coin_type: coin.coin_type.clone(),
            custom_name: coin.custom_name.clone(),
            year: Some(coin.year).filter(|y| *y != 0),
            condition: i64::from(coin.condition.value()),
            notes: coin.notes.clone(),
            metallurgy: coin.metallurgy.clone(),
            manual_value: coin.current_value(),
            value_source: coin
                .valuation
                .as_ref()
                .map(|v| v.source)
                .unwrap_or(ValuationSource::Manual),
        }
    }

    /// Check required fields. Returns the validated year.
    pub fn validate(&self) -> Result<i32, FormError> {
        if self.coin_type.is_none() && self.custom_name.trim().is_empty() {
            return Err(FormError::MissingTypeOrName);
        }
        match self.year {
            Some(year) if YEAR_RANGE.contains(&year) => Ok(year),
            _ => Err(FormError::InvalidYear),
        }
    }

    pub fn valuation_input(&self) -> ValuationInput<'_> {
        ValuationInput {
            coin_type: self.coin_type.as_ref(),
            year: self.year,
            condition: self.condition,
            metallurgy: self.metallurgy.trim(),
            manual_value: self.manual_value,
        }
    }
}

/// Which side of the coin a photo shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
}

/// State staged while the form is open: the record being edited, photo
/// previews and the active valuation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditSession {
    pub editing: Option<CoinId>,
    pub photo_front: Option<String>,
    pub photo_back: Option<String>,
    pub staged: Option<Valuation>,
}

impl EditSession {
    /// Session for editing `coin`: its photos become the previews.
    pub fn for_coin(coin: &Coin) -> Self {
        Self {
            editing: Some(coin.id),
            photo_front: coin.photo_front.clone(),
            photo_back: coin.photo_back.clone(),
            staged: None,
        }
    }

    pub fn set_photo(&mut self, side: Side, data_url: String) {
        let slot = match side {
            Side::Front => &mut self.photo_front,
            Side::Back => &mut self.photo_back,
        };
        *slot = Some(data_url).filter(|d| !d.is_empty());
    }

    pub fn clear_photo(&mut self, side: Side) {
        match side {
            Side::Front => self.photo_front = None,
            Side::Back => self.photo_back = None,
        }
    }

    pub fn swap_photos(&mut self) {
        std::mem::swap(&mut self.photo_front, &mut self.photo_back);
    }

    /// Replace the active valuation.
    pub fn stage(&mut self, valuation: Valuation) {
        self.staged = Some(valuation);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
