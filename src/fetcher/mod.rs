//! Archive fetcher: concurrent, idempotent downloads of dated kline
//! archives.
//!
//! Already-present files are skipped without touching the network, so
//! re-running a fetch cycle is cheap and safe. A 404 is an expected gap
//! (weekend, future date, calendar overflow from the day 1..=31 expansion),
//! not an error. Per-key failures never abort sibling downloads; callers get
//! the tally back in [`FetchStats`].

use crate::config::ArchiveConfig;
use crate::models::{ArchiveKey, MarketCategory};
use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

// ── Outcome ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Destination file already exists; no network call was made.
    AlreadyPresent,
    Downloaded,
    /// Archive does not exist for that date (404) — expected gap.
    NotFound,
    /// Network or write failure; logged, siblings unaffected.
    Failed(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchStats {
    pub already_present: usize,
    pub downloaded: usize,
    pub not_found: usize,
    pub failed: usize,
}

impl FetchStats {
    pub fn tally(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::AlreadyPresent => self.already_present += 1,
            FetchOutcome::Downloaded => self.downloaded += 1,
            FetchOutcome::NotFound => self.not_found += 1,
            FetchOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.already_present + self.downloaded + self.not_found + self.failed
    }
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

pub struct ArchiveFetcher {
    client: reqwest::Client,
    base_url: String,
    category: MarketCategory,
    concurrency: usize,
}

impl ArchiveFetcher {
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let category: MarketCategory = config
            .market_category
            .parse()
            .context("Invalid archive market category")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            category,
            concurrency: config.concurrency.max(1),
        })
    }

    /// Local target path for one archive key.
    pub fn target_path(&self, key: &ArchiveKey, dest_dir: &Path) -> PathBuf {
        dest_dir.join(key.file_name())
    }

    /// Fetch one archive into `dest_dir`. Never returns `Err`; failures are
    /// folded into [`FetchOutcome::Failed`] so one bad key cannot abort a
    /// batch.
    pub async fn fetch(&self, key: &ArchiveKey, dest_dir: &Path) -> FetchOutcome {
        let target = self.target_path(key, dest_dir);

        if target.exists() {
            debug!("{}: already present, skipping", key);
            return FetchOutcome::AlreadyPresent;
        }

        match self.download(key, &target, dest_dir).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{}: {:#}", key, e);
                FetchOutcome::Failed(format!("{:#}", e))
            }
        }
    }

    async fn download(
        &self,
        key: &ArchiveKey,
        target: &Path,
        dest_dir: &Path,
    ) -> Result<FetchOutcome> {
        let url = key.url(&self.base_url, self.category);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request failed for {}", url))?;

        if resp.status() == StatusCode::NOT_FOUND {
            warn!("{}: not found (404)", key);
            return Ok(FetchOutcome::NotFound);
        }
        if !resp.status().is_success() {
            bail!("HTTP {} for {}", resp.status(), url);
        }

        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Could not create dir {:?}", dest_dir))?;
        tokio::fs::write(target, &bytes)
            .await
            .with_context(|| format!("Could not write {:?}", target))?;

        info!("{}: downloaded ({} bytes)", key, bytes.len());
        Ok(FetchOutcome::Downloaded)
    }

    /// Dispatch a whole download plan against a bounded worker pool and wait
    /// for every outcome (the normalizer must only ever see a settled
    /// directory).
    pub async fn fetch_plan(
        self: Arc<Self>,
        plan: Vec<ArchiveKey>,
        dest_dir: &Path,
    ) -> FetchStats {
        info!(
            "Dispatching {} downloads (concurrency {})",
            plan.len(),
            self.concurrency
        );

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(plan.len());

        for key in plan {
            let fetcher = Arc::clone(&self);
            let sem = Arc::clone(&sem);
            let dest_dir = dest_dir.to_path_buf();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                fetcher.fetch(&key, &dest_dir).await
            }));
        }

        let mut stats = FetchStats::default();
        for handle in handles {
            match handle.await {
                Ok(outcome) => stats.tally(&outcome),
                Err(e) => {
                    error!("Download task panicked: {}", e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Fetch done: {} downloaded, {} cached, {} missing, {} failed",
            stats.downloaded, stats.already_present, stats.not_found, stats.failed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn fetcher() -> Arc<ArchiveFetcher> {
        Arc::new(ArchiveFetcher::new(&AppConfig::default().archive).unwrap())
    }

    #[tokio::test]
    async fn test_present_file_is_skipped_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let key = ArchiveKey::monthly("BTCUSDT", "1d", 2024, 1);

        // Pre-seed the target; the fetcher must short-circuit before any
        // request (the configured base URL is never resolved in this test).
        std::fs::write(dir.path().join(key.file_name()), b"cached").unwrap();

        let outcome = fetcher().fetch(&key, dir.path()).await;
        assert_eq!(outcome, FetchOutcome::AlreadyPresent);
        assert_eq!(
            std::fs::read(dir.path().join(key.file_name())).unwrap(),
            b"cached"
        );
    }

    #[tokio::test]
    async fn test_fetch_plan_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let plan: Vec<ArchiveKey> = (1..=3)
            .map(|m| ArchiveKey::monthly("BTCUSDT", "1d", 2024, m))
            .collect();

        for key in &plan {
            std::fs::write(dir.path().join(key.file_name()), key.file_name()).unwrap();
        }

        let f = fetcher();
        let first = Arc::clone(&f).fetch_plan(plan.clone(), dir.path()).await;
        let second = Arc::clone(&f).fetch_plan(plan.clone(), dir.path()).await;

        assert_eq!(first.already_present, 3);
        assert_eq!(second, first);
        for key in &plan {
            assert_eq!(
                std::fs::read(dir.path().join(key.file_name())).unwrap(),
                key.file_name().as_bytes()
            );
        }
    }

    #[test]
    fn test_invalid_category_rejected_at_construction() {
        let mut cfg = AppConfig::default().archive;
        cfg.market_category = "spot".to_string();
        assert!(ArchiveFetcher::new(&cfg).is_err());
    }

    /// Local stand-in for the archive host: serves bytes for one known
    /// archive, 404 for everything else.
    async fn spawn_archive_host(served_file: &'static str) -> std::net::SocketAddr {
        use axum::http::{StatusCode, Uri};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = axum::Router::new().fallback(move |uri: Uri| async move {
            if uri.path().ends_with(served_file) {
                (StatusCode::OK, b"archive-bytes".to_vec())
            } else {
                (StatusCode::NOT_FOUND, Vec::new())
            }
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_missing_archive_does_not_abort_batch() {
        let addr = spawn_archive_host("BTCUSDT-1d-2024-01.zip").await;

        let mut cfg = AppConfig::default().archive;
        cfg.base_url = format!("http://{}", addr);
        let fetcher = Arc::new(ArchiveFetcher::new(&cfg).unwrap());

        let dir = tempfile::tempdir().unwrap();
        // Feb 30 never exists remotely; the sibling download must still land.
        let plan = vec![
            ArchiveKey::monthly("BTCUSDT", "1d", 2024, 1),
            ArchiveKey::daily("BTCUSDT", "1d", 2024, 2, 30),
        ];

        let stats = fetcher.fetch_plan(plan, dir.path()).await;
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.failed, 0);

        assert_eq!(
            std::fs::read(dir.path().join("BTCUSDT-1d-2024-01.zip")).unwrap(),
            b"archive-bytes"
        );
        assert!(!dir.path().join("BTCUSDT-1d-2024-02-30.zip").exists());
    }
}
