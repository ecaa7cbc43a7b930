//! Offline reverse geocoder over two polygon layers: states/provinces and
//! marine regions. Layers load once at startup and are read-only afterwards.

use std::collections::HashMap;
use std::path::Path;

use geo::{BoundingRect, Intersects, MultiPolygon, Point};
use geojson::GeoJson;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use serde::Serialize;
use shapefile::dbase::{FieldValue, Record};
use tracing::info;

use crate::error::{CatalogError, Result};

pub const INTERNATIONAL_WATERS: &str = "International Waters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Geocode {
    pub region: String,
    pub local: String,
}

/// One polygon feature with the attributes the lookup reads.
#[derive(Debug, Clone)]
pub struct LayerFeature {
    pub geometry: MultiPolygon<f64>,
    pub attributes: HashMap<String, String>,
}

impl LayerFeature {
    pub fn new(geometry: MultiPolygon<f64>, attributes: &[(&str, &str)]) -> Self {
        Self {
            geometry,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

type Envelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

#[derive(Debug, Default)]
struct Layer {
    index: RTree<Envelope>,
    features: Vec<LayerFeature>,
}

impl Layer {
    fn new(features: Vec<LayerFeature>) -> Self {
        let envelopes = features
            .iter()
            .enumerate()
            .filter_map(|(position, feature)| {
                let rect = feature.geometry.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                    position,
                ))
            })
            .collect();
        Self {
            index: RTree::bulk_load(envelopes),
            features,
        }
    }

    /// First feature in file order containing the point.
    fn first_hit(&self, lon: f64, lat: f64) -> Option<&LayerFeature> {
        let point = Point::new(lon, lat);
        let mut candidates: Vec<usize> = self
            .index
            .locate_all_at_point(&[lon, lat])
            .map(|envelope| envelope.data)
            .collect();
        candidates.sort_unstable();
        candidates
            .into_iter()
            .map(|position| &self.features[position])
            .find(|feature| feature.geometry.intersects(&point))
    }

    fn len(&self) -> usize {
        self.features.len()
    }
}

#[derive(Debug, Default)]
pub struct ReverseGeocoder {
    states: Layer,
    marine: Layer,
}

impl ReverseGeocoder {
    pub fn from_features(states: Vec<LayerFeature>, marine: Vec<LayerFeature>) -> Self {
        Self {
            states: Layer::new(states),
            marine: Layer::new(marine),
        }
    }

    /// Loads both layers from `.shp` (with sibling `.dbf`) or `.geojson` files.
    pub fn load(states_path: &Path, marine_path: &Path) -> Result<Self> {
        let states = load_layer(states_path)?;
        let marine = load_layer(marine_path)?;
        let geocoder = Self::from_features(states, marine);
        info!(
            states = geocoder.states.len(),
            marine = geocoder.marine.len(),
            "reverse geocoder layers loaded"
        );
        Ok(geocoder)
    }

    pub fn lookup(&self, lat: f64, lon: f64) -> Result<Geocode> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(CatalogError::ExternalService(format!(
                "cannot geocode ({lat}, {lon})"
            )));
        }
        let coordinates = format!("{lat},{lon}");

        if let Some(state) = self.states.first_hit(lon, lat) {
            return Ok(Geocode {
                region: state.attribute("admin").unwrap_or_default().to_string(),
                local: state.attribute("gn_name").unwrap_or_default().to_string(),
            });
        }
        if let Some(sea) = self.marine.first_hit(lon, lat) {
            return Ok(Geocode {
                region: sea.attribute("name_en").unwrap_or_default().to_string(),
                local: coordinates,
            });
        }
        Ok(Geocode {
            region: INTERNATIONAL_WATERS.to_string(),
            local: coordinates,
        })
    }
}

fn load_layer(path: &Path) -> Result<Vec<LayerFeature>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("shp") => load_shapefile(path),
        Some("geojson") | Some("json") => load_geojson(path),
        _ => Err(CatalogError::Config(format!(
            "unsupported geocoder layer {}; expected .shp or .geojson",
            path.display()
        ))),
    }
}

const LAYER_ATTRIBUTES: [&str; 3] = ["admin", "gn_name", "name_en"];

fn load_shapefile(path: &Path) -> Result<Vec<LayerFeature>> {
    let layer_error =
        |err: shapefile::Error| CatalogError::Config(format!("failed to read {}: {err}", path.display()));
    let mut reader = shapefile::Reader::from_path(path).map_err(layer_error)?;

    let mut features = Vec::new();
    for entry in reader.iter_shapes_and_records_as::<shapefile::Polygon, Record>() {
        let (shape, record) = entry.map_err(layer_error)?;
        let geometry = MultiPolygon::<f64>::from(shape);
        let attributes = LAYER_ATTRIBUTES
            .iter()
            .filter_map(|key| field_text(&record, key).map(|value| (key.to_string(), value)))
            .collect();
        features.push(LayerFeature { geometry, attributes });
    }
    Ok(features)
}

fn field_text(record: &Record, key: &str) -> Option<String> {
    match record.get(key)? {
        FieldValue::Character(Some(text)) => Some(text.trim().to_string()),
        FieldValue::Memo(text) => Some(text.trim().to_string()),
        _ => None,
    }
}

fn load_geojson(path: &Path) -> Result<Vec<LayerFeature>> {
    let text = std::fs::read_to_string(path)?;
    let geojson: GeoJson = text
        .parse()
        .map_err(|err| CatalogError::Config(format!("invalid GeoJSON in {}: {err}", path.display())))?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(CatalogError::Config(format!(
            "{} is not a FeatureCollection",
            path.display()
        )));
    };

    let mut features = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let geometry = match geo::Geometry::<f64>::try_from(geometry) {
            Ok(geo::Geometry::Polygon(polygon)) => MultiPolygon(vec![polygon]),
            Ok(geo::Geometry::MultiPolygon(multi)) => multi,
            _ => continue,
        };
        let attributes = feature
            .properties
            .map(|props| {
                props
                    .into_iter()
                    .filter(|(key, _)| LAYER_ATTRIBUTES.contains(&key.as_str()))
                    .filter_map(|(key, value)| value.as_str().map(|text| (key, text.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        features.push(LayerFeature { geometry, attributes });
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    fn geocoder() -> ReverseGeocoder {
        let california = MultiPolygon(vec![polygon![
            (x: -124.0, y: 32.5),
            (x: -114.0, y: 32.5),
            (x: -114.0, y: 42.0),
            (x: -124.0, y: 42.0),
            (x: -124.0, y: 32.5),
        ]]);
        let pacific = MultiPolygon(vec![polygon![
            (x: -180.0, y: -60.0),
            (x: -124.0, y: -60.0),
            (x: -124.0, y: 60.0),
            (x: -180.0, y: 60.0),
            (x: -180.0, y: -60.0),
        ]]);
        ReverseGeocoder::from_features(
            vec![LayerFeature::new(
                california,
                &[("admin", "United States of America"), ("gn_name", "California")],
            )],
            vec![LayerFeature::new(pacific, &[("name_en", "North Pacific Ocean")])],
        )
    }

    #[test]
    fn state_hit_uses_admin_and_name() {
        let hit = geocoder().lookup(34.0, -118.0).unwrap();
        assert_eq!(hit.region, "United States of America");
        assert_eq!(hit.local, "California");
    }

    #[test]
    fn marine_hit_reports_coordinates() {
        let hit = geocoder().lookup(20.0, -150.0).unwrap();
        assert_eq!(hit.region, "North Pacific Ocean");
        assert_eq!(hit.local, "20,-150");
    }

    #[test]
    fn miss_falls_back_to_international_waters() {
        let hit = geocoder().lookup(-70.0, 10.5).unwrap();
        assert_eq!(hit.region, INTERNATIONAL_WATERS);
        assert_eq!(hit.local, "-70,10.5");
    }

    #[test]
    fn geojson_layers_load_from_disk() {
        let dir = std::env::temp_dir().join(format!("satcat-geocoder-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("states.geojson");
        std::fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[{"type":"Feature",
                "properties":{"admin":"Kenya","gn_name":"Nairobi","pop":4},
                "geometry":{"type":"Polygon","coordinates":[[[36.6,-1.5],[37.1,-1.5],[37.1,-1.1],[36.6,-1.1],[36.6,-1.5]]]}}]}"#,
        )
        .unwrap();

        let geocoder = ReverseGeocoder::load(&path, &path).unwrap();
        let hit = geocoder.lookup(-1.3, 36.8).unwrap();
        assert_eq!(hit.local, "Nairobi");
        assert!(ReverseGeocoder::load(&dir.join("x.kml"), &path).is_err());
        std::fs::remove_dir_all(dir).ok();
    }
}
