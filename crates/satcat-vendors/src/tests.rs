use std::fs;
use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use geo::BoundingRect;
use serde_json::{json, Value};

use crate::errors::NormalizeError;
use crate::model::Vendor;
use crate::{normalize_item, normalize_page, parse_page};

fn fixture(path: &str) -> Value {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    let text = fs::read_to_string(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err));
    serde_json::from_str(&text).expect("fixture is valid JSON")
}

#[test]
fn normalizes_airbus_search_page() {
    let body = fixture("airbus_search.json");
    let page = parse_page(Vendor::Airbus, &body).expect("airbus page");
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, Some(2));

    let records: Vec<_> = normalize_page(Vendor::Airbus, &page)
        .into_iter()
        .collect::<Result<_, _>>()
        .expect("airbus records");

    let first = &records[0];
    assert_eq!(first.vendor_id, "ACQ-42");
    assert_eq!(
        first.acquisition_datetime,
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    );
    assert_eq!(first.holdback_seconds(), Some(4 * 3600 + 30 * 60));
    assert_eq!(first.cloud_cover, Some(12.5));
    assert_eq!(first.off_nadir, Some(14.21));
    assert_eq!(first.constellation.as_deref(), Some("PHR"));
    assert_eq!(first.platform.as_deref(), Some("PHR1A"));

    let second = &records[1];
    let ring = &second.footprint.exterior().0;
    assert_eq!(ring.first(), ring.last(), "open ring must be closed");
    assert_eq!(second.constellation.as_deref(), Some("SPOT7"));
    assert_eq!(second.publication_datetime, None);
    assert_eq!(second.holdback_seconds(), None);
    assert_eq!(second.cloud_cover, Some(0.0));
}

#[test]
fn planet_fraction_cloud_cover_becomes_percent() {
    let body = fixture("planet_quick_search.json");
    let page = parse_page(Vendor::Planet, &body).expect("planet page");
    assert!(page
        .next_link
        .as_deref()
        .is_some_and(|link| link.contains("_page=def")));

    let record = normalize_item(Vendor::Planet, &page.items[0]).expect("planet record");
    assert_eq!(record.cloud_cover, Some(30.0));
    assert_eq!(record.gsd, Some(3.7));
    assert_eq!(record.constellation.as_deref(), Some("planetscope"));
    assert_eq!(record.platform.as_deref(), Some("2450"));
    assert!(record.thumbnail_url.is_some());
}

#[test]
fn capella_without_cloud_field_is_sar_sentinel() {
    let body = fixture("capella_search.json");
    let page = parse_page(Vendor::Capella, &body).expect("capella page");
    assert!(page.next_link.is_some());

    let record = normalize_item(Vendor::Capella, &page.items[0]).expect("capella record");
    assert_eq!(record.cloud_cover, Some(-1.0));
    assert_eq!(
        record.acquisition_datetime,
        Utc.with_ymd_and_hms(2024, 6, 4, 10, 15, 0).unwrap()
    );
    assert_eq!(record.off_nadir, Some(31.0));
    assert_eq!(record.sensor.as_deref(), Some("capella-radar-5"));
    assert_eq!(
        record.thumbnail_url.as_deref(),
        Some("https://capella-open-data.s3.amazonaws.com/thumb.png")
    );
}

#[test]
fn maxar_multipolygon_keeps_largest_part() {
    let body = fixture("maxar_search.json");
    let page = parse_page(Vendor::Maxar, &body).expect("maxar page");
    let record = normalize_item(Vendor::Maxar, &page.items[0]).expect("maxar record");

    let rect = record.footprint.bounding_rect().expect("bounding rect");
    assert!((rect.min().x + 74.10).abs() < 1e-9);
    assert!((rect.max().y - 40.80).abs() < 1e-9);
    assert_eq!(record.cloud_cover, Some(7.5));
    assert_eq!(record.constellation.as_deref(), Some("WV03"));
}

#[test]
fn skyfi_converts_centimeters_and_offsets() {
    let body = fixture("skyfi_archives.json");
    let page = parse_page(Vendor::SkyFi, &body).expect("skyfi page");
    assert!(page.next_link.is_none());

    let record = normalize_item(Vendor::SkyFi, &page.items[0]).expect("skyfi record");
    assert_eq!(record.gsd, Some(0.5));
    assert_eq!(
        record.acquisition_datetime,
        Utc.with_ymd_and_hms(2024, 6, 6, 19, 20, 0).unwrap()
    );
    assert_eq!(record.constellation.as_deref(), Some("SuperView"));
    assert_eq!(record.platform.as_deref(), Some("SIWEI"));
}

#[test]
fn blacksky_constellation_falls_back_to_platform() {
    let body = fixture("blacksky_images.json");
    let page = parse_page(Vendor::BlackSky, &body).expect("blacksky page");
    let record = normalize_item(Vendor::BlackSky, &page.items[0]).expect("blacksky record");

    assert_eq!(record.constellation.as_deref(), Some("GLOBAL-7"));
    assert_eq!(record.platform.as_deref(), Some("GLOBAL-7"));
    assert_eq!(record.off_nadir, Some(21.46));
    assert_eq!(record.holdback_seconds(), Some(32 * 60 + 16));
}

#[test]
fn zero_area_footprint_is_rejected() {
    let item = json!({
        "id": "20240606_000000_00_0000",
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[10.0, 10.0], [10.0, 10.0], [10.0, 10.0], [10.0, 10.0]]]
        },
        "properties": { "acquired": "2024-06-06T00:00:00Z", "cloud_cover": 0.1 }
    });

    let err = normalize_item(Vendor::Planet, &item).expect_err("degenerate polygon");
    assert!(err.is_geometry(), "unexpected error: {err}");
}

#[test]
fn publication_before_acquisition_is_invalid() {
    let item = json!({
        "id": "BS-BAD",
        "acquisitionDate": "2024-06-03T08:00:00Z",
        "createdDate": "2024-06-03T07:00:00Z",
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [0.1, 0.0], [0.1, 0.1], [0.0, 0.1], [0.0, 0.0]]]
        }
    });

    let err = normalize_item(Vendor::BlackSky, &item).expect_err("holdback must be non-negative");
    assert!(matches!(err, NormalizeError::InvalidRecord { .. }));
}

#[test]
fn missing_acquisition_reports_field() {
    let item = json!({
        "id": "10300100AAAA",
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [0.1, 0.0], [0.1, 0.1], [0.0, 0.0]]]
        },
        "properties": {}
    });

    let err = normalize_item(Vendor::Maxar, &item).expect_err("datetime is required");
    assert!(matches!(
        err,
        NormalizeError::MissingField { field: "datetime", .. }
    ));
}

#[test]
fn out_of_range_cloud_cover_becomes_unknown() {
    assert_eq!(crate::normalize_cloud_cover(Vendor::Maxar, Some(140.0)), None);
    assert_eq!(crate::normalize_cloud_cover(Vendor::Maxar, None), None);
    assert_eq!(crate::normalize_cloud_cover(Vendor::Capella, Some(20.0)), Some(-1.0));
}

#[test]
fn vendor_names_round_trip_case_insensitively() {
    for vendor in Vendor::ALL {
        let parsed: Vendor = vendor.as_str().to_uppercase().parse().expect("known vendor");
        assert_eq!(parsed, vendor);
    }
    assert!("landsat".parse::<Vendor>().is_err());
}
