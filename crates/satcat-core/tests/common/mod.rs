#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use geo::{polygon, Polygon};
use satcat_core::{CanonicalRecord, Vendor};
use serde_json::json;

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Axis-aligned square of `half` degrees around `(lat, lon)`.
pub fn square(lat: f64, lon: f64, half: f64) -> Polygon<f64> {
    polygon![
        (x: lon - half, y: lat - half),
        (x: lon + half, y: lat - half),
        (x: lon + half, y: lat + half),
        (x: lon - half, y: lat + half),
        (x: lon - half, y: lat - half),
    ]
}

pub fn record(vendor: Vendor, vendor_id: &str, acquired: DateTime<Utc>, footprint: Polygon<f64>) -> CanonicalRecord {
    CanonicalRecord {
        vendor,
        vendor_id: vendor_id.to_string(),
        acquisition_datetime: acquired,
        publication_datetime: None,
        footprint,
        cloud_cover: Some(10.0),
        gsd: Some(0.5),
        off_nadir: Some(12.0),
        azimuth_angle: None,
        illumination_azimuth: None,
        illumination_elevation: None,
        sun_elevation: None,
        constellation: None,
        platform: None,
        sensor: Some("OPTICAL".into()),
        thumbnail_url: None,
        metadata: json!({ "id": vendor_id }),
    }
}

/// An Airbus opensearch feature for `id`, acquired at `acquired`.
pub fn airbus_feature(id: &str, acquired: &str) -> serde_json::Value {
    json!({
        "type": "Feature",
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[-118.1, 33.9], [-117.9, 33.9], [-117.9, 34.1], [-118.1, 34.1], [-118.1, 33.9]]]
        },
        "properties": {
            "id": id,
            "acquisitionDate": acquired,
            "cloudCover": 12.5,
            "platform": "PHR1A",
            "sensorType": "OPTICAL"
        }
    })
}
