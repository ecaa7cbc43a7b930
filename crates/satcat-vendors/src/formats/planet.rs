//! Planet Data API quick-search results. Cloud cover arrives as a 0-1 fraction
//! and pagination follows the `_links._next` URL.

use serde::Deserialize;
use serde_json::Value;

use super::common::{
    angle, constellation_platform, feature_items, footprint_from_geojson, from_value,
    normalize_cloud_cover, parse_datetime, parse_optional_datetime, required, round_to,
};
use crate::errors::NormalizeError;
use crate::model::{CanonicalRecord, Vendor, VendorPage};

const VENDOR: Vendor = Vendor::Planet;

#[derive(Debug, Deserialize)]
struct Feature {
    id: Option<String>,
    geometry: Value,
    properties: Properties,
    #[serde(default, rename = "_links")]
    links: Value,
}

#[derive(Debug, Deserialize)]
struct Properties {
    acquired: Option<String>,
    published: Option<String>,
    cloud_cover: Option<f64>,
    gsd: Option<f64>,
    pixel_resolution: Option<f64>,
    satellite_id: Option<String>,
    provider: Option<String>,
    instrument: Option<String>,
    view_angle: Option<f64>,
    satellite_azimuth: Option<f64>,
    sun_azimuth: Option<f64>,
    sun_elevation: Option<f64>,
}

pub fn parse_page(body: &Value) -> Result<VendorPage, NormalizeError> {
    let next_link = body
        .get("_links")
        .and_then(|links| links.get("_next"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(VendorPage {
        items: feature_items(VENDOR, body, "features")?,
        next_link,
        total: None,
    })
}

pub fn normalize(item: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let feature: Feature = from_value(VENDOR, item)?;
    let props = feature.properties;
    let vendor_id = required(VENDOR, "id", feature.id)?;
    let acquired = required(VENDOR, "acquired", props.acquired.as_deref())?;
    let acquisition_datetime = parse_datetime(VENDOR, "acquired", acquired)?;
    let publication_datetime = parse_optional_datetime(VENDOR, "published", props.published.as_deref())?;
    let footprint = footprint_from_geojson(VENDOR, &vendor_id, &feature.geometry)?;
    let (constellation, platform) = constellation_platform(props.provider, props.satellite_id);

    let thumbnail_url = feature
        .links
        .get("thumbnail")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CanonicalRecord {
        vendor: VENDOR,
        vendor_id,
        acquisition_datetime,
        publication_datetime,
        footprint,
        cloud_cover: normalize_cloud_cover(VENDOR, props.cloud_cover),
        // Planet reports GSD in meters already.
        gsd: props.gsd.or(props.pixel_resolution).map(|v| round_to(v, 2)),
        off_nadir: angle(props.view_angle),
        azimuth_angle: angle(props.satellite_azimuth),
        illumination_azimuth: angle(props.sun_azimuth),
        illumination_elevation: angle(props.sun_elevation),
        sun_elevation: angle(props.sun_elevation),
        constellation,
        platform,
        sensor: props.instrument,
        thumbnail_url,
        metadata: item.get("properties").cloned().unwrap_or(Value::Null),
    })
}
