//! Capella STAC items. SAR, so cloud cover is always the `-1` sentinel.

use serde::Deserialize;
use serde_json::Value;

use super::common::{
    angle, constellation_platform, feature_items, footprint_from_geojson, from_value,
    normalize_cloud_cover, parse_datetime, parse_optional_datetime, required, round_to,
};
use crate::errors::NormalizeError;
use crate::model::{CanonicalRecord, Vendor, VendorPage};

const VENDOR: Vendor = Vendor::Capella;

#[derive(Debug, Deserialize)]
struct Item {
    id: Option<String>,
    geometry: Value,
    properties: Properties,
    #[serde(default)]
    assets: Value,
}

#[derive(Debug, Deserialize)]
struct Properties {
    datetime: Option<String>,
    start_datetime: Option<String>,
    created: Option<String>,
    constellation: Option<String>,
    platform: Option<String>,
    #[serde(default)]
    instruments: Vec<String>,
    #[serde(rename = "view:incidence_angle")]
    incidence_angle: Option<f64>,
    #[serde(rename = "view:look_angle")]
    look_angle: Option<f64>,
    #[serde(rename = "view:azimuth")]
    azimuth: Option<f64>,
    #[serde(rename = "capella:resolution_ground_range")]
    ground_range_resolution: Option<f64>,
    gsd: Option<f64>,
}

pub fn parse_page(body: &Value) -> Result<VendorPage, NormalizeError> {
    let next_link = body
        .get("links")
        .and_then(Value::as_array)
        .and_then(|links| {
            links
                .iter()
                .find(|link| link.get("rel").and_then(Value::as_str) == Some("next"))
        })
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(VendorPage {
        items: feature_items(VENDOR, body, "features")?,
        next_link,
        total: body.get("numberMatched").and_then(Value::as_u64),
    })
}

pub fn normalize(item: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let parsed: Item = from_value(VENDOR, item)?;
    let props = parsed.properties;
    let vendor_id = required(VENDOR, "id", parsed.id)?;

    let acquisition = required(
        VENDOR,
        "datetime",
        props.datetime.as_deref().or(props.start_datetime.as_deref()),
    )?;
    let acquisition_datetime = parse_datetime(VENDOR, "datetime", acquisition)?;
    let publication_datetime = parse_optional_datetime(VENDOR, "created", props.created.as_deref())?;
    let footprint = footprint_from_geojson(VENDOR, &vendor_id, &parsed.geometry)?;
    let (constellation, platform) = constellation_platform(props.constellation, props.platform);

    let thumbnail_url = parsed
        .assets
        .get("thumbnail")
        .and_then(|asset| asset.get("href"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CanonicalRecord {
        vendor: VENDOR,
        vendor_id,
        acquisition_datetime,
        publication_datetime,
        footprint,
        cloud_cover: normalize_cloud_cover(VENDOR, None),
        gsd: props
            .ground_range_resolution
            .or(props.gsd)
            .map(|v| round_to(v, 2)),
        off_nadir: angle(props.look_angle.or(props.incidence_angle)),
        azimuth_angle: angle(props.azimuth),
        illumination_azimuth: None,
        illumination_elevation: None,
        sun_elevation: None,
        constellation,
        platform,
        sensor: props.instruments.into_iter().next(),
        thumbnail_url,
        metadata: item.get("properties").cloned().unwrap_or(Value::Null),
    })
}
