//! Stored capture model and the query vocabulary shared by every store.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use geo::Polygon;
use satcat_vendors::{CanonicalRecord, Vendor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CatalogError, Result};
use crate::geocoder::Geocode;
use crate::geometry::{self, BBox, TimeOfDay};

pub const MAX_PAGE_SIZE: u32 = 500;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// One persisted capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRecord {
    pub id: i64,
    pub vendor: Vendor,
    pub vendor_id: String,
    pub acquisition_datetime: DateTime<Utc>,
    pub publication_datetime: Option<DateTime<Utc>>,
    pub holdback_seconds: Option<i64>,
    #[serde(serialize_with = "geometry::serialize_polygon")]
    pub footprint: Polygon<f64>,
    pub footprint_digest: String,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub area_sq_km: f64,
    pub cloud_cover: Option<f64>,
    pub gsd: Option<f64>,
    pub off_nadir: Option<f64>,
    pub azimuth_angle: Option<f64>,
    pub illumination_azimuth: Option<f64>,
    pub illumination_elevation: Option<f64>,
    pub sun_elevation: Option<f64>,
    pub constellation: Option<String>,
    pub platform: Option<String>,
    pub sensor: Option<String>,
    pub metadata: Value,
    pub centroid_region: Option<String>,
    pub centroid_local: Option<String>,
    pub thumbnail_url: Option<String>,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub is_purchased: bool,
    pub image_uploaded: bool,
    pub created_at: DateTime<Utc>,
}

impl CaptureRecord {
    pub fn area_sq_m(&self) -> f64 {
        self.area_sq_km * 1_000_000.0
    }

    /// Clear means a known cloud cover at or below zero; SAR's `-1` qualifies.
    pub fn is_clear(&self, cloud_max: f64) -> bool {
        self.cloud_cover.is_some_and(|cloud| cloud <= cloud_max)
    }
}

/// A canonical record with every derived column computed, ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCapture {
    pub record: CanonicalRecord,
    pub footprint_digest: String,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub area_sq_km: f64,
    pub centroid_region: Option<String>,
    pub centroid_local: Option<String>,
}

impl PreparedCapture {
    pub fn new(record: CanonicalRecord) -> Result<Self> {
        record.validate()?;
        let (centroid_lat, centroid_lon) = geometry::centroid(&record.footprint)?;
        let area_sq_km = geometry::geodesic_area_km2(&record.footprint)?;
        let footprint_digest = geometry::footprint_digest(&record.footprint);
        Ok(Self {
            record,
            footprint_digest,
            centroid_lat,
            centroid_lon,
            area_sq_km,
            centroid_region: None,
            centroid_local: None,
        })
    }

    pub fn with_geocode(mut self, geocode: Option<Geocode>) -> Self {
        if let Some(geocode) = geocode {
            self.centroid_region = Some(geocode.region);
            self.centroid_local = Some(geocode.local);
        }
        self
    }

    pub fn holdback_seconds(&self) -> Option<i64> {
        self.record.holdback_seconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    UpdatedInPlace,
    DuplicateIgnored,
}

/// Spatial predicate for searches and counts.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialFilter {
    Polygon(Polygon<f64>),
    BBox(BBox),
    /// Captures within `radius_km` great-circle distance of the point.
    Pin { lat: f64, lon: f64, radius_km: f64 },
}

impl SpatialFilter {
    pub fn pin(lat: f64, lon: f64, radius_km: f64) -> Result<Self> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(CatalogError::InvalidInput(format!(
                "distance_km must be positive, got {radius_km}"
            )));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(CatalogError::InvalidInput(format!(
                "pin ({lat}, {lon}) is outside WGS84 bounds"
            )));
        }
        Ok(SpatialFilter::Pin { lat, lon, radius_km })
    }

    /// Polygons an in-process store intersects against. Shapes wrapping
    /// across 180° come back as their western and eastern parts.
    pub fn to_polygons(&self) -> Result<Vec<Polygon<f64>>> {
        match self {
            SpatialFilter::Polygon(polygon) => Ok(geometry::split_antimeridian(polygon)),
            SpatialFilter::BBox(bbox) => Ok(bbox.rects().into_iter().map(|r| r.to_polygon()).collect()),
            SpatialFilter::Pin { lat, lon, radius_km } => Ok(vec![geometry::circle_around(
                *lat,
                *lon,
                *radius_km,
                geometry::PIN_CIRCLE_SEGMENTS,
            )?]),
        }
    }
}

/// Inclusive numeric bounds; `None` on either side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// A bounded range excludes rows where the value is unknown.
    pub fn contains(&self, value: Option<f64>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(value) = value else {
            return false;
        };
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    AcquisitionDatetime,
    Vendor,
    Sensor,
}

impl std::str::FromStr for SortKey {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acquisition_datetime" | "acquisition" | "date" => Ok(SortKey::AcquisitionDatetime),
            "vendor" => Ok(SortKey::Vendor),
            "sensor" => Ok(SortKey::Sensor),
            other => Err(CatalogError::InvalidInput(format!("unknown sort key '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeOfDayFilter {
    pub buckets: Vec<TimeOfDay>,
    pub timezone: Tz,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFilter {
    pub spatial: Option<SpatialFilter>,
    pub vendors: Vec<Vendor>,
    pub acquired_from: Option<DateTime<Utc>>,
    pub acquired_to: Option<DateTime<Utc>>,
    pub cloud_cover: Range,
    pub off_nadir: Range,
    pub gsd: Range,
    pub azimuth_angle: Range,
    pub illumination_azimuth: Range,
    pub illumination_elevation: Range,
    pub time_of_day: Option<TimeOfDayFilter>,
    pub purchased: Option<bool>,
    pub sort: SortKey,
    pub descending: bool,
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self {
            spatial: None,
            vendors: Vec::new(),
            acquired_from: None,
            acquired_to: None,
            cloud_cover: Range::default(),
            off_nadir: Range::default(),
            gsd: Range::default(),
            azimuth_angle: Range::default(),
            illumination_azimuth: Range::default(),
            illumination_elevation: Range::default(),
            time_of_day: None,
            purchased: None,
            sort: SortKey::AcquisitionDatetime,
            descending: true,
        }
    }
}

impl CaptureFilter {
    pub fn within(spatial: SpatialFilter) -> Self {
        Self {
            spatial: Some(spatial),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.acquired_from, self.acquired_to) {
            if from > to {
                return Err(CatalogError::InvalidInput(format!(
                    "time range start {from} is after end {to}"
                )));
            }
        }
        for (name, range) in [
            ("cloud_cover", self.cloud_cover),
            ("off_nadir", self.off_nadir),
            ("gsd", self.gsd),
            ("azimuth_angle", self.azimuth_angle),
            ("illumination_azimuth", self.illumination_azimuth),
            ("illumination_elevation", self.illumination_elevation),
        ] {
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(CatalogError::InvalidInput(format!(
                        "{name} minimum {min} exceeds maximum {max}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Non-spatial predicates, evaluated in process by the memory store.
    pub fn matches_attributes(&self, capture: &CaptureRecord) -> bool {
        if !self.vendors.is_empty() && !self.vendors.contains(&capture.vendor) {
            return false;
        }
        if self.acquired_from.is_some_and(|from| capture.acquisition_datetime < from) {
            return false;
        }
        if self.acquired_to.is_some_and(|to| capture.acquisition_datetime > to) {
            return false;
        }
        if let Some(purchased) = self.purchased {
            if capture.is_purchased != purchased {
                return false;
            }
        }
        let ranges = [
            (self.cloud_cover, capture.cloud_cover),
            (self.off_nadir, capture.off_nadir),
            (self.gsd, capture.gsd),
            (self.azimuth_angle, capture.azimuth_angle),
            (self.illumination_azimuth, capture.illumination_azimuth),
            (self.illumination_elevation, capture.illumination_elevation),
        ];
        if !ranges.iter().all(|(range, value)| range.contains(*value)) {
            return false;
        }
        if let Some(tod) = &self.time_of_day {
            if !tod.buckets.is_empty() {
                let bucket = geometry::time_of_day_bucket(capture.acquisition_datetime, tod.timezone);
                if !tod.buckets.contains(&bucket) {
                    return false;
                }
            }
        }
        true
    }
}

/// 1-based page request; size is clamped to `[1, 500]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size.clamp(1, MAX_PAGE_SIZE))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * self.limit()
    }
}

/// One page of results plus the filtered total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyVendorCount {
    pub date: NaiveDate,
    pub vendor: Vendor,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use geo::polygon;
    use serde_json::json;

    use super::*;

    fn canonical() -> CanonicalRecord {
        CanonicalRecord {
            vendor: Vendor::Maxar,
            vendor_id: "MX-1".into(),
            acquisition_datetime: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            publication_datetime: Some(Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()),
            footprint: polygon![
                (x: 10.0, y: 10.0),
                (x: 10.1, y: 10.0),
                (x: 10.1, y: 10.1),
                (x: 10.0, y: 10.1),
                (x: 10.0, y: 10.0),
            ],
            cloud_cover: Some(5.0),
            gsd: Some(0.31),
            off_nadir: None,
            azimuth_angle: None,
            illumination_azimuth: None,
            illumination_elevation: None,
            sun_elevation: None,
            constellation: None,
            platform: None,
            sensor: None,
            thumbnail_url: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn prepare_computes_derived_columns() {
        let prepared = PreparedCapture::new(canonical()).unwrap();
        assert_eq!(prepared.centroid_lat, 10.05);
        assert_eq!(prepared.centroid_lon, 10.05);
        assert!(prepared.area_sq_km > 120.0 && prepared.area_sq_km < 125.0);
        assert_eq!(prepared.holdback_seconds(), Some(3600));
        assert_eq!(prepared.footprint_digest.len(), 64);
        assert!(prepared.centroid_region.is_none());
    }

    #[test]
    fn prepare_rejects_invalid_cloud_cover() {
        let mut record = canonical();
        record.cloud_cover = Some(140.0);
        assert!(matches!(
            PreparedCapture::new(record),
            Err(CatalogError::InvalidRecord(_))
        ));
    }

    #[test]
    fn page_request_clamps() {
        let page = PageRequest::new(0, 10_000);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit(), 500);
        assert_eq!(page.offset(), 0);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn bounded_range_excludes_unknown_values() {
        let range = Range::new(Some(0.0), Some(10.0));
        assert!(range.contains(Some(10.0)));
        assert!(!range.contains(Some(10.5)));
        assert!(!range.contains(None));
        assert!(Range::default().contains(None));
    }

    #[test]
    fn inverted_filter_ranges_are_invalid_input() {
        let filter = CaptureFilter {
            gsd: Range::new(Some(2.0), Some(1.0)),
            ..CaptureFilter::default()
        };
        assert!(matches!(filter.validate(), Err(CatalogError::InvalidInput(_))));
    }
}
