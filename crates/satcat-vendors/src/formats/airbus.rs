//! OneAtlas search results: a GeoJSON feature collection with camelCase properties.

use serde::Deserialize;
use serde_json::Value;

use super::common::{
    angle, constellation_platform, feature_items, footprint_from_geojson, from_value,
    normalize_cloud_cover, parse_datetime, parse_optional_datetime, required, round_to,
};
use crate::errors::NormalizeError;
use crate::model::{CanonicalRecord, Vendor, VendorPage};

const VENDOR: Vendor = Vendor::Airbus;

#[derive(Debug, Deserialize)]
struct Feature {
    id: Option<String>,
    geometry: Value,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    id: Option<String>,
    acquisition_date: Option<String>,
    publication_date: Option<String>,
    cloud_cover: Option<f64>,
    incidence_angle: Option<f64>,
    azimuth_angle: Option<f64>,
    illumination_azimuth_angle: Option<f64>,
    illumination_elevation_angle: Option<f64>,
    resolution: Option<f64>,
    constellation: Option<String>,
    platform: Option<String>,
    sensor_type: Option<String>,
    quicklook_url: Option<String>,
}

pub fn parse_page(body: &Value) -> Result<VendorPage, NormalizeError> {
    Ok(VendorPage {
        items: feature_items(VENDOR, body, "features")?,
        next_link: None,
        total: body.get("totalResults").and_then(Value::as_u64),
    })
}

pub fn normalize(item: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let feature: Feature = from_value(VENDOR, item)?;
    let props = feature.properties;
    let vendor_id = required(VENDOR, "id", props.id.clone().or(feature.id))?;

    let acquisition = required(VENDOR, "acquisitionDate", props.acquisition_date.as_deref())?;
    let acquisition_datetime = parse_datetime(VENDOR, "acquisitionDate", acquisition)?;
    let publication_datetime =
        parse_optional_datetime(VENDOR, "publicationDate", props.publication_date.as_deref())?;
    let footprint = footprint_from_geojson(VENDOR, &vendor_id, &feature.geometry)?;
    let (constellation, platform) = constellation_platform(props.constellation, props.platform);

    Ok(CanonicalRecord {
        vendor: VENDOR,
        vendor_id,
        acquisition_datetime,
        publication_datetime,
        footprint,
        cloud_cover: normalize_cloud_cover(VENDOR, props.cloud_cover),
        gsd: props.resolution.map(|v| round_to(v, 2)),
        off_nadir: angle(props.incidence_angle),
        azimuth_angle: angle(props.azimuth_angle),
        illumination_azimuth: angle(props.illumination_azimuth_angle),
        illumination_elevation: angle(props.illumination_elevation_angle),
        sun_elevation: angle(props.illumination_elevation_angle),
        constellation,
        platform,
        sensor: props.sensor_type,
        thumbnail_url: props.quicklook_url,
        metadata: item.get("properties").cloned().unwrap_or(Value::Null),
    })
}
