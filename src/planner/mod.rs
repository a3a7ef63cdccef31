//! Archive set planner: expands configured ranges into the full set of
//! archive keys to download. Pure expansion, no network access.
//!
//! Daily plans expand days 1..=31 unconditionally; requests for calendar
//! days that do not exist (Feb 30, Apr 31, ...) come back as 404s from the
//! archive host and are treated as expected gaps by the fetcher.

use crate::models::ArchiveKey;

/// Expand symbols × intervals × years × months into monthly archive keys.
pub fn plan_monthly(
    symbols: &[String],
    intervals: &[String],
    years: &[i32],
    months: &[u32],
) -> Vec<ArchiveKey> {
    let mut plan = Vec::with_capacity(symbols.len() * intervals.len() * years.len() * months.len());
    for symbol in symbols {
        for interval in intervals {
            for &year in years {
                for &month in months {
                    plan.push(ArchiveKey::monthly(symbol, interval, year, month));
                }
            }
        }
    }
    plan
}

/// Expand symbols × intervals × days 1..=31 for one year/month into daily
/// archive keys.
pub fn plan_daily(
    symbols: &[String],
    intervals: &[String],
    year: i32,
    month: u32,
) -> Vec<ArchiveKey> {
    let mut plan = Vec::with_capacity(symbols.len() * intervals.len() * 31);
    for symbol in symbols {
        for interval in intervals {
            for day in 1..=31 {
                plan.push(ArchiveKey::daily(symbol, interval, year, month, day));
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_monthly_expansion_count() {
        let plan = plan_monthly(
            &strs(&["BTCUSDT"]),
            &strs(&["1d"]),
            &[2020, 2021, 2022, 2023, 2024],
            &(1..=12).collect::<Vec<_>>(),
        );
        assert_eq!(plan.len(), 60);
        assert!(plan.iter().all(|k| k.day.is_none()));
    }

    #[test]
    fn test_daily_expansion_includes_invalid_days() {
        let plan = plan_daily(&strs(&["BTCUSDT"]), &strs(&["1d"]), 2024, 2);
        assert_eq!(plan.len(), 31);
        // Feb 30 stays in the plan; the fetcher deals with the 404.
        assert!(plan.iter().any(|k| k.day == Some(30)));
    }

    #[test]
    fn test_plan_has_no_duplicate_targets() {
        let mut plan = plan_monthly(
            &strs(&["BTCUSDT", "ETHUSDT"]),
            &strs(&["1d", "1h"]),
            &[2023, 2024],
            &[1, 2, 3],
        );
        plan.extend(plan_daily(&strs(&["BTCUSDT", "ETHUSDT"]), &strs(&["1d", "1h"]), 2024, 3));

        let names: HashSet<String> = plan.iter().map(|k| k.file_name()).collect();
        assert_eq!(names.len(), plan.len());
    }
}
