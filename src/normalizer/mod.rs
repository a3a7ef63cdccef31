//! Dataset normalizer: merges every downloaded kline archive into one
//! time-sorted canonical series CSV.
//!
//! This is a full rebuild on every run — the archive directory is the source
//! of truth and the previous series file is overwritten wholesale. That keeps
//! the merge logic trivial (no incremental append, no conflict handling) at
//! the cost of rereading every archive each run.

use crate::models::{PriceRow, KLINE_COLUMNS};
use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Token that marks the inner CSV's first line as a header row.
const HEADER_TOKEN: &str = "open_time";

/// Rebuild the canonical series from every archive in `archive_dir` and
/// persist it to `series_path`, overwriting any prior version.
///
/// Per-file problems (non-zip entries, corrupt archives, short rows) are
/// logged and skipped; an empty archive directory aborts the whole run with
/// no partial write.
pub fn normalize(archive_dir: &Path, series_path: &Path) -> Result<Vec<PriceRow>> {
    let files = list_archive_dir(archive_dir)?;
    if files.is_empty() {
        bail!("No files found in {:?} — nothing to normalize", archive_dir);
    }
    info!("Found {} files in {:?}", files.len(), archive_dir);

    let mut rows: Vec<PriceRow> = Vec::new();

    for path in &files {
        if path.extension().map(|e| e == "zip").unwrap_or(false) {
            match parse_archive(path) {
                Ok(parsed) => {
                    debug!("{:?}: {} rows", path.file_name().unwrap_or_default(), parsed.len());
                    rows.extend(parsed);
                }
                Err(e) => warn!("Skipping unreadable archive {:?}: {:#}", path, e),
            }
        } else {
            warn!("Skipping non-zip file: {:?}", path);
        }
    }

    rows.sort_by_key(|r| r.timestamp);
    rows.dedup_by_key(|r| r.timestamp);

    persist_series(&rows, series_path)?;
    info!("Canonical series written to {:?} ({} rows)", series_path, rows.len());
    Ok(rows)
}

/// Load a previously persisted canonical series.
pub fn load_series(series_path: &Path) -> Result<Vec<PriceRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(series_path)
        .with_context(|| format!("Failed to open series {:?}", series_path))?;

    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: PriceRow = result.context("Malformed series row")?;
        rows.push(row);
    }
    Ok(rows)
}

// ── Internals ─────────────────────────────────────────────────────────────────

fn list_archive_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Could not read archive dir {:?}", dir))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Read the single inner CSV of one archive and parse its kline rows.
fn parse_archive(path: &Path) -> Result<Vec<PriceRow>> {
    let file = File::open(path).with_context(|| format!("Could not open {:?}", path))?;
    let mut archive = ZipArchive::new(file).context("Not a readable zip archive")?;
    if archive.len() == 0 {
        bail!("Archive contains no files");
    }

    let mut inner = archive.by_index(0).context("Could not open inner file")?;
    let mut raw = Vec::new();
    inner
        .read_to_end(&mut raw)
        .context("Could not read inner file")?;

    // Newer archive exports carry a header line; older ones are raw data.
    let has_header = raw.starts_with(HEADER_TOKEN.as_bytes());

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .from_reader(raw.as_slice());

    let mut rows = Vec::new();
    let mut warned_extra = false;

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        if record.len() > KLINE_COLUMNS.len() && !warned_extra {
            warn!(
                "{:?}: rows carry {} columns, truncating to the first {}",
                path,
                record.len(),
                KLINE_COLUMNS.len()
            );
            warned_extra = true;
        }

        match parse_record(&record) {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Row {} in {:?}: {:#}", i + 1, path, e),
        }
    }

    Ok(rows)
}

fn parse_record(record: &csv::StringRecord) -> Result<PriceRow> {
    if record.len() < KLINE_COLUMNS.len() {
        bail!("Expected {} columns, got {}", KLINE_COLUMNS.len(), record.len());
    }

    let int = |idx: usize, name: &str| -> Result<i64> {
        record[idx]
            .trim()
            .parse::<f64>()
            .map(|v| v as i64)
            .with_context(|| format!("Bad {} value '{}'", name, &record[idx]))
    };
    let float = |idx: usize, name: &str| -> Result<f64> {
        record[idx]
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Bad {} value '{}'", name, &record[idx]))
    };

    let end_time = int(6, "end_time")?;

    // end_time + 1ms: the bar belongs to the instant just after its close.
    let timestamp = Utc
        .timestamp_millis_opt(end_time + 1)
        .single()
        .with_context(|| format!("end_time {} out of range", end_time))?;

    Ok(PriceRow {
        timestamp,
        start_time: int(0, "start_time")?,
        open: float(1, "open")?,
        high: float(2, "high")?,
        low: float(3, "low")?,
        close: float(4, "close")?,
        volume: float(5, "volume")?,
        end_time,
        volume_usd: float(7, "volume_usd")?,
        n_trades: float(8, "n_trades")?,
        taker_volume: float(9, "taker_volume")?,
        taker_volume_usd: float(10, "taker_volume_usd")?,
    })
}

fn persist_series(rows: &[PriceRow], series_path: &Path) -> Result<()> {
    if let Some(parent) = series_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }

    let mut writer = csv::Writer::from_path(series_path)
        .with_context(|| format!("Could not create series file {:?}", series_path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
