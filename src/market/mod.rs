//! Recent-price source for the forecast server.
//!
//! The server never reads the training archives at request time; it pulls a
//! short, fresh daily window from CoinGecko on every request. The source sits
//! behind [`PriceSource`] so tests can substitute a canned sequence.

use crate::config::MarketConfig;
use crate::models::PricePoint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("market data request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-200 from the upstream API; status and body are propagated.
    #[error("market data API returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("market data response malformed: {0}")]
    Malformed(String),
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable recent-price source.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Time-ordered recent daily prices, oldest first. The last point may
    /// represent the current, incomplete interval — callers decide whether
    /// to keep it.
    async fn recent_prices(&self) -> Result<Vec<PricePoint>, MarketError>;

    /// Current market snapshot, used for request-time logging only.
    async fn market_snapshot(&self) -> Result<MarketSnapshot, MarketError>;
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Log-only market context; every field is optional because the upstream
/// payload shape is not under our control.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_volume: Option<f64>,
    pub price_change_24h_pct: Option<f64>,
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MarketChart {
    prices: Vec<(i64, f64)>,
}

#[derive(Debug, Deserialize)]
struct CoinInfo {
    name: Option<String>,
    symbol: Option<String>,
    market_data: Option<CoinMarketData>,
}

#[derive(Debug, Deserialize)]
struct CoinMarketData {
    current_price: Option<HashMap<String, f64>>,
    market_cap: Option<HashMap<String, f64>>,
    total_volume: Option<HashMap<String, f64>>,
    price_change_percentage_24h: Option<f64>,
}

// ── CoinGecko client ──────────────────────────────────────────────────────────

pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    coin_id: String,
    vs_currency: String,
    window_days: u32,
}

impl CoinGeckoSource {
    pub fn new(config: &MarketConfig) -> Result<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .context("Invalid market base URL")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            coin_id: config.coin_id.clone(),
            vs_currency: config.vs_currency.clone(),
            window_days: config.window_days,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MarketError> {
        let url = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path);
        debug!("GET {}", url);

        let mut req = self.client.get(&url).query(query).header("accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("x-cg-demo-api-key", key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MarketError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| MarketError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn recent_prices(&self) -> Result<Vec<PricePoint>, MarketError> {
        let chart: MarketChart = self
            .get_json(
                &format!("coins/{}/market_chart", self.coin_id),
                &[
                    ("vs_currency", self.vs_currency.clone()),
                    ("days", self.window_days.to_string()),
                    ("interval", "daily".to_string()),
                ],
            )
            .await?;

        let mut points = Vec::with_capacity(chart.prices.len());
        for (ms, price) in chart.prices {
            let timestamp = Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| MarketError::Malformed(format!("timestamp {} out of range", ms)))?;
            points.push(PricePoint { timestamp, price });
        }
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    async fn market_snapshot(&self) -> Result<MarketSnapshot, MarketError> {
        let info: CoinInfo = self
            .get_json(&format!("coins/{}", self.coin_id), &[])
            .await?;

        let vs = &self.vs_currency;
        let pick = |m: &Option<HashMap<String, f64>>| m.as_ref().and_then(|m| m.get(vs).copied());
        let market = info.market_data;

        Ok(MarketSnapshot {
            name: info.name,
            symbol: info.symbol,
            current_price: market.as_ref().and_then(|m| pick(&m.current_price)),
            market_cap: market.as_ref().and_then(|m| pick(&m.market_cap)),
            total_volume: market.as_ref().and_then(|m| pick(&m.total_volume)),
            price_change_24h_pct: market.as_ref().and_then(|m| m.price_change_percentage_24h),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_chart_parses_pair_arrays() {
        let json = r#"{"prices": [[1700000000000, 35000.5], [1700086400000, 35500.0]]}"#;
        let chart: MarketChart = serde_json::from_str(json).unwrap();
        assert_eq!(chart.prices.len(), 2);
        assert_eq!(chart.prices[0], (1_700_000_000_000, 35000.5));
    }

    #[test]
    fn test_market_chart_missing_prices_is_an_error() {
        let json = r#"{"market_caps": []}"#;
        assert!(serde_json::from_str::<MarketChart>(json).is_err());
    }

    #[test]
    fn test_coin_info_tolerates_missing_keys() {
        let info: CoinInfo = serde_json::from_str(r#"{"name": "Bitcoin"}"#).unwrap();
        assert_eq!(info.name.as_deref(), Some("Bitcoin"));
        assert!(info.market_data.is_none());
    }
}
