use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::catalog::CaptureRecord;
use crate::geometry::round_to;

pub const HEATMAP_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeatmapDay {
    pub date: NaiveDate,
    pub count: i64,
}

/// Per-site acquisition statistics shown in site listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteStats {
    pub acquisition_count: i64,
    pub most_recent: Option<CaptureRecord>,
    pub most_recent_clear: Option<CaptureRecord>,
    pub records_per_acquisition: Option<f64>,
    pub time_between_acquisitions: Option<f64>,
    pub heatmap: Vec<HeatmapDay>,
}

/// Captures on the latest day divided by the distinct acquisition instants
/// that day. `times` must be ascending.
pub fn records_per_acquisition(times: &[DateTime<Utc>]) -> Option<f64> {
    let latest_day = times.last()?.date_naive();
    let same_day: Vec<&DateTime<Utc>> = times.iter().filter(|t| t.date_naive() == latest_day).collect();
    let mut distinct = same_day.clone();
    distinct.dedup();
    Some(round_to(same_day.len() as f64 / distinct.len().max(1) as f64, 2))
}

/// Days from the last capture of the prior capture day to the first capture
/// of the latest day. `times` must be ascending.
pub fn time_between_acquisitions(times: &[DateTime<Utc>]) -> Option<f64> {
    let latest_day = times.last()?.date_naive();
    let first_latest = times.iter().find(|t| t.date_naive() == latest_day)?;
    let last_prior = times.iter().rev().find(|t| t.date_naive() < latest_day)?;
    let gap = *first_latest - *last_prior;
    Some(round_to(gap.num_seconds() as f64 / 86_400.0, 2))
}

/// Midnight UTC of the first heatmap day.
pub fn heatmap_start(today: NaiveDate) -> DateTime<Utc> {
    (today - Duration::days(HEATMAP_DAYS - 1)).and_time(NaiveTime::MIN).and_utc()
}

pub fn start_of_day(time: DateTime<Utc>) -> DateTime<Utc> {
    time.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Daily counts for the `HEATMAP_DAYS` days ending on `today`, zero-filled.
pub fn heatmap(times: &[DateTime<Utc>], today: NaiveDate) -> Vec<HeatmapDay> {
    let first = today - Duration::days(HEATMAP_DAYS - 1);
    let mut counts: BTreeMap<NaiveDate, i64> = (0..HEATMAP_DAYS)
        .map(|offset| (first + Duration::days(offset), 0))
        .collect();
    for time in times {
        if let Some(count) = counts.get_mut(&time.date_naive()) {
            *count += 1;
        }
    }
    counts
        .into_iter()
        .map(|(date, count)| HeatmapDay { date, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, h, 0, 0).unwrap()
    }

    #[test]
    fn latest_day_ratio_counts_shared_instants() {
        let times = vec![at(1, 9), at(3, 10), at(3, 10), at(3, 14)];
        assert_eq!(records_per_acquisition(&times), Some(1.5));
        assert_eq!(records_per_acquisition(&[]), None);
    }

    #[test]
    fn gap_spans_prior_day_to_latest_day() {
        let times = vec![at(1, 6), at(1, 18), at(3, 6), at(3, 20)];
        assert_eq!(time_between_acquisitions(&times), Some(1.5));
        assert_eq!(time_between_acquisitions(&[at(3, 1), at(3, 2)]), None);
    }

    #[test]
    fn heatmap_is_zero_filled() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let times = vec![at(1, 0), at(30, 1), at(30, 2), Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()];
        let days = heatmap(&times, today);
        assert_eq!(days.len(), 30);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(days[0].count, 1);
        assert_eq!(days[29].count, 2);
        assert_eq!(days.iter().map(|d| d.count).sum::<i64>(), 3);
    }
}
