use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ── Market category ───────────────────────────────────────────────────────────

/// Binance futures archive namespace: coin-margined or USD-margined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketCategory {
    Cm,
    Um,
}

#[derive(Debug, Error)]
#[error("market category must be 'cm' or 'um', got '{0}'")]
pub struct InvalidMarketCategory(pub String);

impl FromStr for MarketCategory {
    type Err = InvalidMarketCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cm" => Ok(MarketCategory::Cm),
            "um" => Ok(MarketCategory::Um),
            other => Err(InvalidMarketCategory(other.to_string())),
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketCategory::Cm => write!(f, "cm"),
            MarketCategory::Um => write!(f, "um"),
        }
    }
}

// ── Archive key ───────────────────────────────────────────────────────────────

/// Identifies one remote kline archive and its local target file.
///
/// Monthly archives carry no day; daily archives carry day 1..=31 (invalid
/// calendar days included — those resolve as 404s at fetch time).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub symbol: String,
    pub interval: String,
    pub year: i32,
    pub month: u32,
    pub day: Option<u32>,
}

impl ArchiveKey {
    pub fn monthly(symbol: &str, interval: &str, year: i32, month: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            year,
            month,
            day: None,
        }
    }

    pub fn daily(symbol: &str, interval: &str, year: i32, month: u32, day: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            year,
            month,
            day: Some(day),
        }
    }

    /// Archive file name, e.g. `BTCUSDT-1d-2024-01.zip` / `BTCUSDT-1d-2024-01-05.zip`.
    pub fn file_name(&self) -> String {
        match self.day {
            Some(day) => format!(
                "{}-{}-{}-{:02}-{:02}.zip",
                self.symbol, self.interval, self.year, self.month, day
            ),
            None => format!(
                "{}-{}-{}-{:02}.zip",
                self.symbol, self.interval, self.year, self.month
            ),
        }
    }

    /// Full download URL under the given base and market namespace.
    pub fn url(&self, base_url: &str, category: MarketCategory) -> String {
        let period = if self.day.is_some() { "daily" } else { "monthly" };
        format!(
            "{}/{}/{}/klines/{}/{}/{}",
            base_url.trim_end_matches('/'),
            category,
            period,
            self.symbol,
            self.interval,
            self.file_name()
        )
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

// ── Price row ─────────────────────────────────────────────────────────────────

/// Canonical kline column names, in archive order (first 11 columns).
pub const KLINE_COLUMNS: [&str; 11] = [
    "start_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "end_time",
    "volume_usd",
    "n_trades",
    "taker_volume",
    "taker_volume_usd",
];

/// One bar of the canonical series.
///
/// `timestamp` is derived as `end_time + 1ms` so a bar sorts strictly after
/// the interval it closes, avoiding boundary ambiguity between archives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub timestamp: DateTime<Utc>,
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub end_time: i64,
    pub volume_usd: f64,
    pub n_trades: f64,
    pub taker_volume: f64,
    pub taker_volume_usd: f64,
}

impl PriceRow {
    /// Mean of open/high/low/close — the regression target.
    pub fn avg_price(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }
}

// ── Training sample ───────────────────────────────────────────────────────────

/// One regression sample: seconds-since-epoch ordinal → average bar price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSample {
    pub time_ordinal: f64,
    pub avg_price: f64,
}

impl From<&PriceRow> for TrainingSample {
    fn from(row: &PriceRow) -> Self {
        Self {
            time_ordinal: row.timestamp.timestamp_millis() as f64 / 1000.0,
            avg_price: row.avg_price(),
        }
    }
}

// ── Price window ──────────────────────────────────────────────────────────────

/// A short, time-ordered window of recent prices fetched at request time.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_category_parse() {
        assert_eq!("um".parse::<MarketCategory>().unwrap(), MarketCategory::Um);
        assert_eq!("CM".parse::<MarketCategory>().unwrap(), MarketCategory::Cm);
        assert!("spot".parse::<MarketCategory>().is_err());
        assert!("".parse::<MarketCategory>().is_err());
    }

    #[test]
    fn test_archive_file_names() {
        let monthly = ArchiveKey::monthly("BTCUSDT", "1d", 2024, 3);
        assert_eq!(monthly.file_name(), "BTCUSDT-1d-2024-03.zip");

        let daily = ArchiveKey::daily("BTCUSDT", "1d", 2024, 3, 7);
        assert_eq!(daily.file_name(), "BTCUSDT-1d-2024-03-07.zip");
    }

    #[test]
    fn test_archive_url() {
        let key = ArchiveKey::monthly("BTCUSDT", "1d", 2021, 12);
        let url = key.url("https://data.binance.vision/data/futures", MarketCategory::Um);
        assert_eq!(
            url,
            "https://data.binance.vision/data/futures/um/monthly/klines/BTCUSDT/1d/BTCUSDT-1d-2021-12.zip"
        );

        let key = ArchiveKey::daily("ETHUSDT", "1h", 2024, 1, 2);
        let url = key.url("https://data.binance.vision/data/futures/", MarketCategory::Cm);
        assert_eq!(
            url,
            "https://data.binance.vision/data/futures/cm/daily/klines/ETHUSDT/1h/ETHUSDT-1h-2024-01-02.zip"
        );
    }

    #[test]
    fn test_avg_price() {
        let row = PriceRow {
            timestamp: Utc::now(),
            start_time: 0,
            open: 10.0,
            high: 20.0,
            low: 5.0,
            close: 15.0,
            volume: 0.0,
            end_time: 0,
            volume_usd: 0.0,
            n_trades: 0.0,
            taker_volume: 0.0,
            taker_volume_usd: 0.0,
        };
        assert_eq!(row.avg_price(), 12.5);
    }
}
