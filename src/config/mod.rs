use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub archive: ArchiveConfig,
    pub storage: StorageConfig,
    pub market: MarketConfig,
    pub forecast: ForecastConfig,
    pub server: ServerConfig,
}

/// Binance archive download configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_base_url")]
    pub base_url: String,

    /// Futures market namespace: "cm" (coin-margined) or "um" (usd-margined).
    #[serde(default = "default_market_category")]
    pub market_category: String,

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,

    #[serde(default = "default_years")]
    pub years: Vec<i32>,

    #[serde(default = "default_months")]
    pub months: Vec<u32>,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// On-disk artifact locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_series_path")]
    pub series_path: PathBuf,

    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
}

/// CoinGecko market-data source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
    #[serde(default = "default_market_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_coin_id")]
    pub coin_id: String,

    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,

    #[serde(default = "default_window_days")]
    pub window_days: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Forecasting strategy selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForecastConfig {
    /// "trained" (persisted regression artifact) or "window" (fit over the
    /// fetched window at request time).
    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(default = "default_horizon")]
    pub horizon: usize,

    #[serde(default = "default_supported_token")]
    pub supported_token: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_archive_base_url() -> String {
    "https://data.binance.vision/data/futures".to_string()
}
fn default_market_category() -> String {
    "um".to_string()
}
fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string()]
}
fn default_intervals() -> Vec<String> {
    vec!["1d".to_string()]
}
fn default_years() -> Vec<i32> {
    vec![2020, 2021, 2022, 2023, 2024]
}
fn default_months() -> Vec<u32> {
    (1..=12).collect()
}
fn default_concurrency() -> usize {
    8
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data/binance/futures-klines")
}
fn default_series_path() -> PathBuf {
    PathBuf::from("data/btc_price_data.csv")
}
fn default_model_path() -> PathBuf {
    PathBuf::from("data/model/linear_model.json")
}
fn default_market_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_coin_id() -> String {
    "bitcoin".to_string()
}
fn default_vs_currency() -> String {
    "usd".to_string()
}
fn default_window_days() -> u32 {
    30
}
fn default_strategy() -> String {
    "window".to_string()
}
fn default_horizon() -> usize {
    1
}
fn default_supported_token() -> String {
    "BTC".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("FORECASTER").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            archive: ArchiveConfig {
                base_url: default_archive_base_url(),
                market_category: default_market_category(),
                symbols: default_symbols(),
                intervals: default_intervals(),
                years: default_years(),
                months: default_months(),
                concurrency: default_concurrency(),
                timeout_secs: default_timeout_secs(),
            },
            storage: StorageConfig {
                data_dir: default_data_dir(),
                series_path: default_series_path(),
                model_path: default_model_path(),
            },
            market: MarketConfig {
                base_url: default_market_base_url(),
                api_key: None,
                coin_id: default_coin_id(),
                vs_currency: default_vs_currency(),
                window_days: default_window_days(),
                timeout_secs: default_timeout_secs(),
            },
            forecast: ForecastConfig {
                strategy: default_strategy(),
                horizon: default_horizon(),
                supported_token: default_supported_token(),
            },
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
        }
    }
}
