use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use geo::{Area, Geometry, Polygon};
use geojson::GeoJson;
use serde::de::DeserializeOwned;
use serde_json::Value;
use wkt::TryFromWkt;

use crate::errors::NormalizeError;
use crate::model::{CloudScale, Vendor};

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

const MIN_PLANAR_AREA: f64 = 1e-12;

pub(crate) fn from_value<T: DeserializeOwned>(vendor: Vendor, value: &Value) -> Result<T, NormalizeError> {
    serde_json::from_value(value.clone()).map_err(|source| NormalizeError::Payload { vendor, source })
}

pub(crate) fn required<T>(vendor: Vendor, field: &'static str, value: Option<T>) -> Result<T, NormalizeError> {
    value.ok_or(NormalizeError::MissingField { vendor, field })
}

/// Parses a vendor timestamp into UTC truncated to whole seconds. Offset-less
/// timestamps are taken as UTC.
pub fn parse_datetime(vendor: Vendor, field: &'static str, raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc).trunc_subsecs(0));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc().trunc_subsecs(0));
        }
    }
    Err(NormalizeError::InvalidDatetime {
        vendor,
        field,
        value: raw.to_string(),
    })
}

pub(crate) fn parse_optional_datetime(
    vendor: Vendor,
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    raw.map(|value| parse_datetime(vendor, field, value)).transpose()
}

/// Maps a vendor cloud value onto percent. SAR vendors always yield `-1`;
/// values that are still outside `[0, 100]` after scaling become unknown.
pub fn normalize_cloud_cover(vendor: Vendor, raw: Option<f64>) -> Option<f64> {
    let scaled = match vendor.cloud_scale() {
        CloudScale::NotApplicable => return Some(-1.0),
        CloudScale::Fraction => raw.map(|value| value * 100.0),
        CloudScale::Percent => raw,
    }?;
    let rounded = round_to(scaled, 2);
    (0.0..=100.0).contains(&rounded).then_some(rounded)
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub(crate) fn angle(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(|v| round_to(v, 2))
}

/// Fills whichever of constellation/platform the vendor left out with the other.
pub(crate) fn constellation_platform(
    constellation: Option<String>,
    platform: Option<String>,
) -> (Option<String>, Option<String>) {
    let constellation = constellation.filter(|value| !value.trim().is_empty());
    let platform = platform.filter(|value| !value.trim().is_empty());
    match (constellation, platform) {
        (None, Some(platform)) => (Some(platform.clone()), Some(platform)),
        (Some(constellation), None) => (Some(constellation.clone()), Some(constellation)),
        other => other,
    }
}

pub fn footprint_from_geojson(vendor: Vendor, vendor_id: &str, value: &Value) -> Result<Polygon<f64>, NormalizeError> {
    let geojson = GeoJson::from_json_value(value.clone())
        .map_err(|err| geometry_error(vendor, vendor_id, err.to_string()))?;
    let geometry = match geojson {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| geometry_error(vendor, vendor_id, "feature has no geometry"))?,
        GeoJson::FeatureCollection(_) => {
            return Err(geometry_error(vendor, vendor_id, "expected a geometry, got a collection"))
        }
    };
    let geometry = Geometry::<f64>::try_from(geometry)
        .map_err(|err| geometry_error(vendor, vendor_id, err.to_string()))?;
    polygon_from_geometry(vendor, vendor_id, geometry)
}

pub fn footprint_from_wkt(vendor: Vendor, vendor_id: &str, text: &str) -> Result<Polygon<f64>, NormalizeError> {
    let geometry = Geometry::<f64>::try_from_wkt_str(text)
        .map_err(|err| geometry_error(vendor, vendor_id, err.to_string()))?;
    polygon_from_geometry(vendor, vendor_id, geometry)
}

/// Reduces a vendor geometry to a single closed polygon. Multi-part footprints
/// keep their largest part.
fn polygon_from_geometry(vendor: Vendor, vendor_id: &str, geometry: Geometry<f64>) -> Result<Polygon<f64>, NormalizeError> {
    let polygon = match geometry {
        Geometry::Polygon(polygon) => polygon,
        Geometry::Rect(rect) => rect.to_polygon(),
        Geometry::MultiPolygon(multi) => multi
            .0
            .into_iter()
            .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
            .ok_or_else(|| geometry_error(vendor, vendor_id, "empty multipolygon"))?,
        _ => return Err(geometry_error(vendor, vendor_id, "footprint is not a polygon")),
    };

    // Polygon::new closes rings; rebuild in case the source skipped it.
    let (exterior, interiors) = polygon.into_inner();
    let polygon = Polygon::new(exterior, interiors);

    if polygon.exterior().0.len() < 4 {
        return Err(geometry_error(vendor, vendor_id, "ring has fewer than three vertices"));
    }
    if polygon
        .exterior()
        .coords()
        .any(|c| !c.x.is_finite() || !c.y.is_finite() || c.x.abs() > 180.0 || c.y.abs() > 90.0)
    {
        return Err(geometry_error(vendor, vendor_id, "coordinates outside WGS84 bounds"));
    }
    if polygon.unsigned_area() < MIN_PLANAR_AREA {
        return Err(geometry_error(vendor, vendor_id, "zero-area polygon"));
    }
    Ok(polygon)
}

fn geometry_error(vendor: Vendor, vendor_id: &str, message: impl Into<String>) -> NormalizeError {
    NormalizeError::InvalidGeometry {
        vendor,
        vendor_id: vendor_id.to_string(),
        message: message.into(),
    }
}

pub(crate) fn feature_items(vendor: Vendor, body: &Value, key: &'static str) -> Result<Vec<Value>, NormalizeError> {
    match body.get(key) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(_) => Err(NormalizeError::MissingField { vendor, field: key }),
    }
}
