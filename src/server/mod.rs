//! Forecast HTTP server.
//!
//! One endpoint matters: `GET /inference/{token}`. Each request pulls a
//! fresh recent-price window from the market source (no caching), drops the
//! possibly-incomplete last point, runs the configured forecasting strategy
//! and answers with a single plain-text scalar. All state the handlers need
//! lives in an [`AppContext`] built once at startup and passed through axum
//! `State` — no globals.

use crate::config::AppConfig;
use crate::forecast::{build_forecaster, Forecaster};
use crate::market::{CoinGeckoSource, MarketError, PriceSource};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// ── Context ───────────────────────────────────────────────────────────────────

/// Process-wide server context: built once in `serve`, read-only afterwards.
pub struct AppContext {
    pub config: AppConfig,
    pub source: Arc<dyn PriceSource>,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Token is required")]
    MissingToken,

    #[error("Token not supported")]
    UnsupportedToken,

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("Price window contains NaN or Inf values")]
    NonFinite,

    #[error("{0}")]
    Forecast(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingToken | ApiError::UnsupportedToken => StatusCode::BAD_REQUEST,
            // Upstream failures propagate their own status; everything else
            // is an internal error.
            ApiError::Market(MarketError::Upstream { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!("Request failed ({}): {:#}", status, self);
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /inference` and `GET /inference/` — no token at all.
async fn inference_missing_token() -> ApiError {
    ApiError::MissingToken
}

async fn inference(
    State(ctx): State<Arc<AppContext>>,
    Path(token): Path<String>,
) -> Result<String, ApiError> {
    let started = Instant::now();
    info!("Inference request for token '{}'", token);

    validate_token(&token, &ctx.config.forecast.supported_token)?;

    // Strategy is rebuilt per request: no shared mutable state between
    // concurrent requests, at the price of re-reading the artifact.
    let forecaster = build_forecaster(&ctx.config.forecast, &ctx.config.storage.model_path)
        .map_err(|e| ApiError::Pipeline(format!("{:#}", e)))?;

    // Log-only market context; failure here never fails the request.
    match ctx.source.market_snapshot().await {
        Ok(snap) => info!(
            "Market snapshot: {:?} ({:?}) price={:?} cap={:?} vol={:?} 24h={:?}%",
            snap.name,
            snap.symbol,
            snap.current_price,
            snap.market_cap,
            snap.total_volume,
            snap.price_change_24h_pct
        ),
        Err(e) => warn!("Market snapshot unavailable: {:#}", e),
    }

    let value = run_forecast(
        ctx.source.as_ref(),
        forecaster.as_ref(),
        ctx.config.forecast.horizon,
    )
    .await?;

    info!(
        "Forecast {:.2} via {} ({:.2?})",
        value,
        forecaster.name(),
        started.elapsed()
    );
    Ok(value.to_string())
}

fn validate_token(token: &str, supported: &str) -> Result<(), ApiError> {
    if token.trim().is_empty() {
        return Err(ApiError::MissingToken);
    }
    if token != supported {
        return Err(ApiError::UnsupportedToken);
    }
    Ok(())
}

/// Fetch → drop partial point → validate → forecast.
///
/// The last fetched point always covers the current, possibly-incomplete
/// interval, so it is dropped unconditionally before the strategy sees the
/// window.
async fn run_forecast(
    source: &dyn PriceSource,
    forecaster: &dyn Forecaster,
    horizon: usize,
) -> Result<f64, ApiError> {
    let mut window = source.recent_prices().await?;
    if window.is_empty() {
        return Err(ApiError::Market(MarketError::Malformed(
            "empty price window".to_string(),
        )));
    }
    window.pop();

    if window.iter().any(|p| !p.price.is_finite()) {
        return Err(ApiError::NonFinite);
    }

    forecaster
        .forecast(&window, horizon)
        .map_err(|e| ApiError::Forecast(format!("{:#}", e)))
}

// ── Server ────────────────────────────────────────────────────────────────────

pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/inference", get(inference_missing_token))
        .route("/inference/", get(inference_missing_token))
        .route("/inference/:token", get(inference))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let source: Arc<dyn PriceSource> = Arc::new(CoinGeckoSource::new(&config.market)?);
    let ctx = Arc::new(AppContext { config, source });
    let app = router(ctx);

    info!("Forecast server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
