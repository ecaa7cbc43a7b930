//! Read-side queries over the catalog: decorated listings, area analytics
//! with rolling-window change, the capture calendar and ingestion history.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use futures::future::try_join_all;
use geo::Polygon;
use serde::Serialize;
use tracing::warn;

use crate::address::AddressResolver;
use crate::catalog::{CaptureFilter, CaptureRecord, DailyVendorCount, PageRequest, Paged, SpatialFilter};
use crate::error::Result;
use crate::geometry::{self, round_to, TimeOfDay};
use crate::history::{HistoryFilter, IngestionCursor};
use crate::store::Store;

/// Rolling windows, in days, compared against the window before them.
pub const HORIZON_DAYS: [i64; 6] = [1, 4, 30, 60, 90, 180];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Centroid {
    pub lat: f64,
    pub lon: f64,
}

/// A capture decorated for listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureView {
    #[serde(flatten)]
    pub capture: CaptureRecord,
    pub area: f64,
    pub centroid: Centroid,
    pub time_type: TimeOfDay,
}

impl CaptureView {
    pub fn new(capture: CaptureRecord, tz: Tz) -> Self {
        Self {
            area: capture.area_sq_km,
            centroid: Centroid {
                lat: capture.centroid_lat,
                lon: capture.centroid_lon,
            },
            time_type: geometry::time_of_day_bucket(capture.acquisition_datetime, tz),
            capture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HorizonStats {
    pub days: i64,
    pub current_count: i64,
    pub previous_count: i64,
    pub percentage_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaAnalytics {
    pub oldest: Option<CaptureRecord>,
    pub newest: Option<CaptureRecord>,
    pub newest_clear: Option<CaptureRecord>,
    pub total_count: i64,
    pub average_per_day: f64,
    pub horizons: Vec<HorizonStats>,
    pub address: Option<String>,
}

/// `(current - previous) / previous * 100`, or 0 without a baseline.
pub fn percentage_change(current: i64, previous: i64) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    round_to((current - previous) as f64 / previous as f64 * 100.0, 2)
}

#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn Store>,
    address: Arc<dyn AddressResolver>,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn Store>, address: Arc<dyn AddressResolver>) -> Self {
        Self { store, address }
    }

    pub async fn list_captures(&self, filter: &CaptureFilter, page: PageRequest, tz: Tz) -> Result<Paged<CaptureView>> {
        filter.validate()?;
        let (captures, total) = self.store.search(filter, page).await?;
        Ok(Paged::new(captures, total, page).map(|capture| CaptureView::new(capture, tz)))
    }

    pub async fn pin_analytics(&self, lat: f64, lon: f64, distance_km: f64) -> Result<AreaAnalytics> {
        self.pin_analytics_at(lat, lon, distance_km, Utc::now()).await
    }

    pub async fn pin_analytics_at(
        &self,
        lat: f64,
        lon: f64,
        distance_km: f64,
        now: DateTime<Utc>,
    ) -> Result<AreaAnalytics> {
        let area = SpatialFilter::pin(lat, lon, distance_km)?;
        self.area_analytics(&area, (lat, lon), now).await
    }

    pub async fn polygon_analytics(&self, wkt: &str) -> Result<AreaAnalytics> {
        self.polygon_analytics_at(wkt, Utc::now()).await
    }

    pub async fn polygon_analytics_at(&self, wkt: &str, now: DateTime<Utc>) -> Result<AreaAnalytics> {
        let polygon: Polygon<f64> = geometry::polygon_from_wkt(wkt)?;
        let center = geometry::centroid(&polygon)?;
        self.area_analytics(&SpatialFilter::Polygon(polygon), center, now).await
    }

    async fn area_analytics(
        &self,
        area: &SpatialFilter,
        (lat, lon): (f64, f64),
        now: DateTime<Utc>,
    ) -> Result<AreaAnalytics> {
        let (oldest, newest, newest_clear) = futures::try_join!(
            self.store.oldest_in(area),
            self.store.newest_in(area),
            self.store.newest_clear_in(area, 0.0),
        )?;

        let (total_count, average_per_day) = match &oldest {
            Some(first) => {
                let total = self.store.window_count(area, first.acquisition_datetime, now).await?;
                let days = (now - first.acquisition_datetime).num_days().max(1);
                (total, round_to(total as f64 / days as f64, 2))
            }
            None => (0, 0.0),
        };

        let horizons = try_join_all(HORIZON_DAYS.iter().map(|&days| self.horizon(area, days, now))).await?;

        let address = match self.address.resolve(lat, lon).await {
            Ok(address) => address,
            Err(err) => {
                warn!(lat, lon, error = %err, "address lookup failed");
                None
            }
        };

        Ok(AreaAnalytics {
            oldest,
            newest,
            newest_clear,
            total_count,
            average_per_day,
            horizons,
            address,
        })
    }

    async fn horizon(&self, area: &SpatialFilter, days: i64, now: DateTime<Utc>) -> Result<HorizonStats> {
        let span = Duration::days(days);
        let (current_count, previous_count) = futures::try_join!(
            self.store.window_count(area, now - span, now),
            self.store.window_count(area, now - span - span, now - span),
        )?;
        Ok(HorizonStats {
            days,
            current_count,
            previous_count,
            percentage_change: percentage_change(current_count, previous_count),
        })
    }

    /// Non-zero `(date, vendor)` counts, ordered by date then vendor.
    pub async fn calendar(&self, filter: &CaptureFilter) -> Result<Vec<DailyVendorCount>> {
        filter.validate()?;
        self.store.daily_counts(filter).await
    }

    pub async fn collection_history(
        &self,
        filter: &HistoryFilter,
        page: PageRequest,
    ) -> Result<Paged<IngestionCursor>> {
        let (rows, total) = self.store.list_history(filter, page).await?;
        Ok(Paged::new(rows, total, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_without_baseline_is_zero() {
        assert_eq!(percentage_change(5, 0), 0.0);
        assert_eq!(percentage_change(2, 1), 100.0);
        assert_eq!(percentage_change(1, 3), -66.67);
    }
}
