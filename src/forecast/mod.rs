//! Forecasting strategies behind one capability interface.
//!
//! Two variants, chosen once at startup:
//!
//! - `trained`: loads the persisted regression artifact and extrapolates it
//!   to the steps after the fetched window;
//! - `window`: fits a fresh regression over the fetched window itself, so a
//!   forecast tracks the last 30 days rather than the multi-year trend.
//!
//! If the trained artifact is configured but missing on disk, startup falls
//! back to the window strategy with a warning instead of failing.

use crate::config::ForecastConfig;
use crate::models::{PricePoint, TrainingSample};
use crate::trainer::LinearModel;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// Seconds per daily step; the serve-time window is daily-granularity.
const DAY_SECS: f64 = 86_400.0;

pub trait Forecaster: Send + Sync {
    fn name(&self) -> &'static str;

    /// Forecast `horizon` steps past the end of `window` and reduce to one
    /// scalar by averaging the per-step predictions.
    fn forecast(&self, window: &[PricePoint], horizon: usize) -> Result<f64>;
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn ordinal(p: &PricePoint) -> f64 {
    p.timestamp.timestamp_millis() as f64 / 1000.0
}

/// Average of the model's predictions over the `horizon` steps following the
/// window's last point.
fn extrapolate(model: &LinearModel, window: &[PricePoint], horizon: usize) -> Result<f64> {
    let last = window.last().context("Empty price window")?;
    if horizon == 0 {
        bail!("Forecast horizon must be at least 1");
    }

    let mut sum = 0.0;
    for step in 1..=horizon {
        sum += model.predict(ordinal(last) + step as f64 * DAY_SECS);
    }
    Ok(sum / horizon as f64)
}

// ── Window regression ─────────────────────────────────────────────────────────

/// Fits a regression over the fetched window at request time.
pub struct WindowRegressionForecaster;

impl Forecaster for WindowRegressionForecaster {
    fn name(&self) -> &'static str {
        "window-regression"
    }

    fn forecast(&self, window: &[PricePoint], horizon: usize) -> Result<f64> {
        let samples: Vec<TrainingSample> = window
            .iter()
            .map(|p| TrainingSample {
                time_ordinal: ordinal(p),
                avg_price: p.price,
            })
            .collect();

        let model = LinearModel::fit(&samples).context("Window fit failed")?;
        extrapolate(&model, window, horizon)
    }
}

// ── Trained model ─────────────────────────────────────────────────────────────

/// Extrapolates the persisted training artifact.
pub struct TrainedModelForecaster {
    model: LinearModel,
}

impl TrainedModelForecaster {
    pub fn load(model_path: &Path) -> Result<Self> {
        let model = LinearModel::load(model_path)?;
        Ok(Self { model })
    }
}

impl Forecaster for TrainedModelForecaster {
    fn name(&self) -> &'static str {
        "trained-model"
    }

    fn forecast(&self, window: &[PricePoint], horizon: usize) -> Result<f64> {
        extrapolate(&self.model, window, horizon)
    }
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// Build the configured strategy, falling back to window regression when the
/// trained artifact is unavailable.
pub fn build_forecaster(config: &ForecastConfig, model_path: &Path) -> Result<Box<dyn Forecaster>> {
    match config.strategy.as_str() {
        "window" => Ok(Box::new(WindowRegressionForecaster)),
        "trained" => match TrainedModelForecaster::load(model_path) {
            Ok(f) => {
                info!("Using trained model artifact {:?}", model_path);
                Ok(Box::new(f))
            }
            Err(e) => {
                warn!(
                    "Trained model unavailable ({:#}); falling back to window regression",
                    e
                );
                Ok(Box::new(WindowRegressionForecaster))
            }
        },
        other => bail!("Unknown forecast strategy '{}' (expected 'trained' or 'window')", other),
    }
}
