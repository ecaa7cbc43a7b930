//! SkyFi archive search. Footprints arrive as WKT and resolution in centimeters.

use serde::Deserialize;
use serde_json::Value;

use super::common::{
    angle, constellation_platform, feature_items, footprint_from_wkt, from_value,
    normalize_cloud_cover, parse_datetime, parse_optional_datetime, required, round_to,
};
use crate::errors::NormalizeError;
use crate::model::{CanonicalRecord, Vendor, VendorPage};

const VENDOR: Vendor = Vendor::SkyFi;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Archive {
    archive_id: Option<String>,
    provider: Option<String>,
    constellation: Option<String>,
    product_type: Option<String>,
    platform_resolution: Option<f64>,
    capture_timestamp: Option<String>,
    published_timestamp: Option<String>,
    cloud_coverage_percent: Option<f64>,
    off_nadir_angle: Option<f64>,
    sun_azimuth: Option<f64>,
    sun_elevation: Option<f64>,
    footprint: Option<String>,
    #[serde(default)]
    thumbnail_urls: Value,
}

pub fn parse_page(body: &Value) -> Result<VendorPage, NormalizeError> {
    Ok(VendorPage {
        items: feature_items(VENDOR, body, "archives")?,
        next_link: body.get("nextPage").and_then(Value::as_str).map(str::to_string),
        total: body.get("total").and_then(Value::as_u64),
    })
}

pub fn normalize(item: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let archive: Archive = from_value(VENDOR, item)?;
    let vendor_id = required(VENDOR, "archiveId", archive.archive_id)?;
    let captured = required(VENDOR, "captureTimestamp", archive.capture_timestamp.as_deref())?;
    let acquisition_datetime = parse_datetime(VENDOR, "captureTimestamp", captured)?;
    let publication_datetime = parse_optional_datetime(
        VENDOR,
        "publishedTimestamp",
        archive.published_timestamp.as_deref(),
    )?;
    let wkt = required(VENDOR, "footprint", archive.footprint.as_deref())?;
    let footprint = footprint_from_wkt(VENDOR, &vendor_id, wkt)?;
    let (constellation, platform) = constellation_platform(archive.constellation, archive.provider);

    let thumbnail_url = archive
        .thumbnail_urls
        .as_object()
        .and_then(|urls| urls.values().find_map(Value::as_str))
        .map(str::to_string);

    Ok(CanonicalRecord {
        vendor: VENDOR,
        vendor_id,
        acquisition_datetime,
        publication_datetime,
        footprint,
        cloud_cover: normalize_cloud_cover(VENDOR, archive.cloud_coverage_percent),
        gsd: archive.platform_resolution.map(|cm| round_to(cm / 100.0, 2)),
        off_nadir: angle(archive.off_nadir_angle),
        azimuth_angle: None,
        illumination_azimuth: angle(archive.sun_azimuth),
        illumination_elevation: angle(archive.sun_elevation),
        sun_elevation: angle(archive.sun_elevation),
        constellation,
        platform,
        sensor: archive.product_type,
        thumbnail_url,
        metadata: item.clone(),
    })
}
