// The in-memory collection: an ordered list of coins with search, sorting,
// summary statistics and CSV export.

use std::cmp::Reverse;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::model::{Coin, CoinId};
use crate::routes::deep_link;

/// Column header of the CSV export.
pub const CSV_HEADER: [&str; 9] = [
    "Name",
    "Type",
    "Year",
    "Condition",
    "Metallurgy",
    "Value",
    "Source",
    "Notes",
    "QR Code",
];

/// Totals shown above the collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectionStats {
    pub total_value: f64,
    pub coin_count: usize,
    /// Average over valued coins only; 0 when nothing is valued.
    pub avg_value: f64,
}

/// A rendered CSV export.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvExport {
    pub file_name: String,
    pub contents: String,
    pub rows: usize,
}

/// Ordered list of coins. Insertion order is preserved; views are sorted on
/// demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    coins: Vec<Coin>,
}

impl Collection {
    pub fn new(coins: Vec<Coin>) -> Self {
        Self { coins }
    }

    pub fn coins(&self) -> &[Coin] {
        &self.coins
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn get(&self, id: CoinId) -> Option<&Coin> {
        self.coins.iter().find(|c| c.id == id)
    }

    /// An id for a new coin: the current time in milliseconds, or one past
    /// the largest existing id if that is not already larger.
    pub fn next_id(&self, now_ms: i64) -> CoinId {
        let max_existing = self.coins.iter().map(|c| c.id).max();
        match max_existing {
            Some(max) if max >= now_ms => max + 1,
            _ => now_ms,
        }
    }

    /// Replace the coin with the same id in place, or append it. Returns
    /// `true` when an existing record was replaced.
    pub fn upsert(&mut self, coin: Coin) -> bool {
        match self.coins.iter_mut().find(|c| c.id == coin.id) {
            Some(existing) => {
                *existing = coin;
                true
            }
            None => {
                self.coins.push(coin);
                false
            }
        }
    }

    /// Remove the coin with `id`. Absent ids are a no-op. The relative order
    /// of the remaining coins is unchanged.
    pub fn remove(&mut self, id: CoinId) -> Option<Coin> {
        let idx = self.coins.iter().position(|c| c.id == id)?;
        Some(self.coins.remove(idx))
    }

    /// Overwrite the whole list (remote snapshots).
    pub fn replace_all(&mut self, coins: Vec<Coin>) {
        self.coins = coins;
    }

    /// Give every coin without a deep-link code one. Returns whether any
    /// coin changed.
    pub fn ensure_codes(&mut self, base_url: &str) -> bool {
        let mut changed = false;
        for coin in self.coins.iter_mut().filter(|c| c.qr_code.is_empty()) {
            coin.qr_code = deep_link(base_url, coin.id);
            changed = true;
        }
        changed
    }

    /// Coins matching `search` (case-insensitive substring over the coin's
    /// text fields), newest first, ties broken by descending id.
    pub fn filtered(&self, search: &str) -> Vec<&Coin> {
        let needle = search.to_lowercase();
        let mut list: Vec<&Coin> = self
            .coins
            .iter()
            .filter(|c| needle.is_empty() || c.search_blob().to_lowercase().contains(&needle))
            .collect();
        list.sort_by_key(|c| (Reverse(c.created_at), Reverse(c.id)));
        list
    }

    pub fn stats(&self) -> CollectionStats {
        let total_value: f64 = self.coins.iter().map(Coin::current_value).sum();
        let valued = self
            .coins
            .iter()
            .filter(|c| c.current_value() > 0.0)
            .count();
        CollectionStats {
            total_value,
            coin_count: self.coins.len(),
            avg_value: if valued > 0 {
                total_value / valued as f64
            } else {
                0.0
            },
        }
    }

    /// Render the filtered view as CSV. Returns `None` when nothing matches,
    /// in which case no file should be written.
    pub fn export_csv(&self, search: &str, today: NaiveDate) -> Result<Option<CsvExport>> {
        let list = self.filtered(search);
        if list.is_empty() {
            return Ok(None);
        }

        let mut header = WriterBuilder::new()
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        header
            .write_record(CSV_HEADER)
            .context("failed to write CSV header")?;
        let buf = header
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush CSV header: {e}"))?;

        // Quoting is per column: text always quoted, numbers bare. The
        // writer itself never quotes, so the text cells arrive pre-quoted.
        let mut rows = WriterBuilder::new()
            .quote_style(QuoteStyle::Never)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(buf);
        for coin in &list {
            let source = coin
                .valuation
                .as_ref()
                .map(|v| v.source.as_str())
                .unwrap_or("none");
            rows.write_record([
                quoted(&coin.display_name),
                quoted(coin.type_label()),
                coin.year_label(),
                coin.condition.value().to_string(),
                quoted(&coin.metallurgy),
                format!("{:.2}", coin.current_value()),
                quoted(source),
                quoted(&coin.notes),
                quoted(&coin.qr_code),
            ])
            .with_context(|| format!("failed to write CSV row for coin {}", coin.id))?;
        }
        let bytes = rows
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush CSV rows: {e}"))?;
        let contents = String::from_utf8(bytes).context("CSV export is not valid UTF-8")?;

        Ok(Some(CsvExport {
            file_name: format!("coincat-collection-{}.csv", today.format("%Y-%m-%d")),
            contents,
            rows: list.len(),
        }))
    }
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}
