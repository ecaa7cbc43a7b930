use serde::Deserialize;
use serde_json::Value;

use super::common::{
    angle, constellation_platform, feature_items, footprint_from_geojson, from_value,
    normalize_cloud_cover, parse_datetime, parse_optional_datetime, required, round_to,
};
use crate::errors::NormalizeError;
use crate::model::{CanonicalRecord, Vendor, VendorPage};

const VENDOR: Vendor = Vendor::Maxar;

#[derive(Debug, Deserialize)]
struct Item {
    id: Option<String>,
    geometry: Value,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Properties {
    datetime: Option<String>,
    created: Option<String>,
    #[serde(rename = "eo:cloud_cover")]
    cloud_cover: Option<f64>,
    #[serde(rename = "view:off_nadir")]
    off_nadir: Option<f64>,
    #[serde(rename = "view:azimuth")]
    azimuth: Option<f64>,
    #[serde(rename = "view:sun_azimuth")]
    sun_azimuth: Option<f64>,
    #[serde(rename = "view:sun_elevation")]
    sun_elevation: Option<f64>,
    gsd: Option<f64>,
    constellation: Option<String>,
    platform: Option<String>,
    #[serde(default)]
    instruments: Vec<String>,
}

pub fn parse_page(body: &Value) -> Result<VendorPage, NormalizeError> {
    Ok(VendorPage {
        items: feature_items(VENDOR, body, "features")?,
        next_link: None,
        total: body.get("numberMatched").and_then(Value::as_u64),
    })
}

pub fn normalize(item: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let parsed: Item = from_value(VENDOR, item)?;
    let props = parsed.properties;
    let vendor_id = required(VENDOR, "id", parsed.id)?;
    let acquisition = required(VENDOR, "datetime", props.datetime.as_deref())?;
    let acquisition_datetime = parse_datetime(VENDOR, "datetime", acquisition)?;
    let publication_datetime = parse_optional_datetime(VENDOR, "created", props.created.as_deref())?;
    let footprint = footprint_from_geojson(VENDOR, &vendor_id, &parsed.geometry)?;
    let (constellation, platform) = constellation_platform(props.constellation, props.platform);

    Ok(CanonicalRecord {
        vendor: VENDOR,
        vendor_id,
        acquisition_datetime,
        publication_datetime,
        footprint,
        cloud_cover: normalize_cloud_cover(VENDOR, props.cloud_cover),
        gsd: props.gsd.map(|v| round_to(v, 2)),
        off_nadir: angle(props.off_nadir),
        azimuth_angle: angle(props.azimuth),
        illumination_azimuth: angle(props.sun_azimuth),
        illumination_elevation: angle(props.sun_elevation),
        sun_elevation: angle(props.sun_elevation),
        constellation,
        platform,
        sensor: props.instruments.into_iter().next(),
        thumbnail_url: None,
        metadata: item.get("properties").cloned().unwrap_or(Value::Null),
    })
}
