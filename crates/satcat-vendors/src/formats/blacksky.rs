use serde::Deserialize;
use serde_json::Value;

use super::common::{
    angle, constellation_platform, feature_items, footprint_from_geojson, from_value,
    normalize_cloud_cover, parse_datetime, parse_optional_datetime, required, round_to,
};
use crate::errors::NormalizeError;
use crate::model::{CanonicalRecord, Vendor, VendorPage};

const VENDOR: Vendor = Vendor::BlackSky;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    id: Option<String>,
    geometry: Value,
    acquisition_date: Option<String>,
    created_date: Option<String>,
    cloud_cover_percent: Option<f64>,
    off_nadir_angle: Option<f64>,
    satellite_azimuth: Option<f64>,
    sun_azimuth: Option<f64>,
    sun_elevation: Option<f64>,
    gsd: Option<f64>,
    constellation: Option<String>,
    satellite_name: Option<String>,
    sensor_name: Option<String>,
    thumbnail_url: Option<String>,
}

pub fn parse_page(body: &Value) -> Result<VendorPage, NormalizeError> {
    Ok(VendorPage {
        items: feature_items(VENDOR, body, "data")?,
        next_link: None,
        total: body.get("total").and_then(Value::as_u64),
    })
}

pub fn normalize(item: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let image: Image = from_value(VENDOR, item)?;
    let vendor_id = required(VENDOR, "id", image.id)?;
    let acquisition = required(VENDOR, "acquisitionDate", image.acquisition_date.as_deref())?;
    let acquisition_datetime = parse_datetime(VENDOR, "acquisitionDate", acquisition)?;
    let publication_datetime =
        parse_optional_datetime(VENDOR, "createdDate", image.created_date.as_deref())?;
    let footprint = footprint_from_geojson(VENDOR, &vendor_id, &image.geometry)?;
    let (constellation, platform) = constellation_platform(image.constellation, image.satellite_name);

    let mut metadata = item.clone();
    if let Some(object) = metadata.as_object_mut() {
        object.remove("geometry");
    }

    Ok(CanonicalRecord {
        vendor: VENDOR,
        vendor_id,
        acquisition_datetime,
        publication_datetime,
        footprint,
        cloud_cover: normalize_cloud_cover(VENDOR, image.cloud_cover_percent),
        gsd: image.gsd.map(|v| round_to(v, 2)),
        off_nadir: angle(image.off_nadir_angle),
        azimuth_angle: angle(image.satellite_azimuth),
        illumination_azimuth: angle(image.sun_azimuth),
        illumination_elevation: angle(image.sun_elevation),
        sun_elevation: angle(image.sun_elevation),
        constellation,
        platform,
        sensor: image.sensor_name,
        thumbnail_url: image.thumbnail_url,
        metadata,
    })
}
