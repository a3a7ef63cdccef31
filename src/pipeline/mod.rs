//! Pipeline orchestrator: planner → fetcher → normalizer → trainer.
//!
//! One `run()` is one retrain cycle:
//!   1. Plan monthly archives for the configured historical window plus
//!      daily archives for the current month (keeps the series tail fresh
//!      between monthly archive publications).
//!   2. Fetch the whole plan concurrently and wait for every outcome —
//!      normalization must never see a half-settled directory.
//!   3. Rebuild the canonical series wholesale from whatever archives exist.
//!   4. Fit and persist the regression model.
//!
//! Idempotent: re-running with no remote changes downloads nothing and
//! rewrites identical artifacts.

use crate::config::AppConfig;
use crate::fetcher::{ArchiveFetcher, FetchStats};
use crate::normalizer;
use crate::planner;
use crate::trainer;
use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use std::sync::Arc;
use tracing::info;

pub struct Pipeline {
    config: AppConfig,
}

#[derive(Debug)]
pub struct PipelineStats {
    pub fetch: FetchStats,
    pub series_rows: usize,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Plan + fetch only (no normalize/train).
    pub async fn fetch(&self) -> Result<FetchStats> {
        let archive = &self.config.archive;
        let fetcher =
            Arc::new(ArchiveFetcher::new(archive).context("Failed to build fetcher")?);

        info!(
            "=== Step 1: Downloading archives for {:?} ({:?}) ===",
            archive.symbols, archive.intervals
        );
        let mut plan = planner::plan_monthly(
            &archive.symbols,
            &archive.intervals,
            &archive.years,
            &archive.months,
        );

        let now = Utc::now();
        info!(
            "Adding daily archives for the current month ({}-{:02})",
            now.year(),
            now.month()
        );
        plan.extend(planner::plan_daily(
            &archive.symbols,
            &archive.intervals,
            now.year(),
            now.month(),
        ));

        Ok(fetcher
            .fetch_plan(plan, &self.config.storage.data_dir)
            .await)
    }

    /// Full retrain cycle: fetch → normalize → train.
    pub async fn run(&self) -> Result<PipelineStats> {
        let fetch = self.fetch().await?;

        info!("=== Step 2: Normalizing archives ===");
        let rows = normalizer::normalize(
            &self.config.storage.data_dir,
            &self.config.storage.series_path,
        )?;

        info!("=== Step 3: Training model ===");
        trainer::train(
            &self.config.storage.series_path,
            &self.config.storage.model_path,
        )?;

        let stats = PipelineStats {
            fetch,
            series_rows: rows.len(),
        };
        info!(
            "=== Done: {} archives settled | {} series rows ===",
            stats.fetch.total(),
            stats.series_rows
        );
        Ok(stats)
    }
}
