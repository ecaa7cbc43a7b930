//! Geometry helpers shared by the catalog, analytics and sites layers.
//!
//! Every polygon is WGS84 longitude/latitude. Areas are geodesic on the
//! ellipsoid; centroids are planar, matching how PostGIS computes them on
//! `geometry` columns.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use geo::orient::{Direction, Orient};
use geo::{
    BooleanOps, BoundingRect, Centroid, Coord, GeodesicArea, GeodesicDestination, Intersects,
    LineString, MapCoords, Point, Polygon, Rect,
};
use geojson::GeoJson;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use wkt::{ToWkt, TryFromWkt};

use crate::error::{CatalogError, Result};

/// Vertex distance multiplier that makes a hexagon's area equal the circle of
/// the requested radius: `sqrt(2π / (3√3))`.
const HEXAGON_EQUAL_AREA_SCALE: f64 = 1.0996361107912678;
const MAX_BUFFER_RADIUS_KM: f64 = 2_000.0;
pub const PIN_CIRCLE_SEGMENTS: usize = 64;

pub fn round_to(value: f64, places: i32) -> f64 {
    satcat_vendors::round_to(value, places)
}

fn check_lat_lon(lat: f64, lon: f64) -> Result<()> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(CatalogError::GeodesicOutOfRange(format!(
            "non-finite coordinate ({lat}, {lon})"
        )));
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(CatalogError::GeodesicOutOfRange(format!(
            "coordinate ({lat}, {lon}) outside WGS84 bounds"
        )));
    }
    Ok(())
}

fn check_polygon_range(polygon: &Polygon<f64>) -> Result<()> {
    let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
    for ring in rings {
        for coord in ring.coords() {
            check_lat_lon(coord.y, coord.x)?;
        }
    }
    Ok(())
}

/// Ellipsoidal area in square kilometres, rounded to 2 decimals. Either ring
/// orientation gives the same result.
pub fn geodesic_area_km2(polygon: &Polygon<f64>) -> Result<f64> {
    check_polygon_range(polygon)?;
    // The signed area is reduced into (-A/2, A/2], so a clockwise ring comes
    // back negative instead of as the complement of the globe.
    let square_meters = polygon.orient(Direction::Default).geodesic_area_signed().abs();
    if !square_meters.is_finite() {
        return Err(CatalogError::GeodesicOutOfRange(
            "area computation did not converge".into(),
        ));
    }
    Ok(round_to(square_meters / 1_000_000.0, 2))
}

/// Planar centroid as `(lat, lon)` rounded to 5 decimals.
pub fn centroid(polygon: &Polygon<f64>) -> Result<(f64, f64)> {
    let point = polygon
        .centroid()
        .ok_or_else(|| CatalogError::InvalidGeometry("polygon has no centroid".into()))?;
    Ok((round_to(point.y(), 5), round_to(point.x(), 5)))
}

fn ring_around(lat: f64, lon: f64, distance_km: f64, vertices: usize) -> Result<Polygon<f64>> {
    check_lat_lon(lat, lon)?;
    if !distance_km.is_finite() || distance_km <= 0.0 || distance_km > MAX_BUFFER_RADIUS_KM {
        return Err(CatalogError::GeodesicOutOfRange(format!(
            "radius {distance_km} km must be in (0, {MAX_BUFFER_RADIUS_KM}]"
        )));
    }
    let origin = Point::new(lon, lat);
    let step = 360.0 / vertices as f64;
    // Bearings run 0°, -step, -2·step … so the ring winds counter-clockwise.
    let mut coords: Vec<Coord<f64>> = (0..vertices)
        .map(|i| {
            let bearing = ((vertices - i) % vertices) as f64 * step;
            origin.geodesic_destination(bearing, distance_km * 1_000.0).0
        })
        .collect();
    if let Some(first) = coords.first().copied() {
        coords.push(first);
    }
    Ok(Polygon::new(LineString::from(coords), vec![]))
}

/// Six vertices at bearings 0°, 300° … 60°, first vertex repeated last. The
/// vertex distance is scaled so the hexagon covers the same area as the circle
/// of `radius_km`.
pub fn hexagon_around(lat: f64, lon: f64, radius_km: f64) -> Result<Polygon<f64>> {
    ring_around(lat, lon, radius_km * HEXAGON_EQUAL_AREA_SCALE, 6)
}

/// Geodesic circle approximation used for pin searches.
pub fn circle_around(lat: f64, lon: f64, radius_km: f64, segments: usize) -> Result<Polygon<f64>> {
    ring_around(lat, lon, radius_km, segments.max(8))
}

/// Axis-aligned WGS84 box. `min_lon > max_lon` means the box crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        check_lat_lon(min_lat, min_lon).map_err(|err| CatalogError::InvalidInput(err.to_string()))?;
        check_lat_lon(max_lat, max_lon).map_err(|err| CatalogError::InvalidInput(err.to_string()))?;
        if min_lat > max_lat {
            return Err(CatalogError::InvalidInput(format!(
                "bbox min_lat {min_lat} exceeds max_lat {max_lat}"
            )));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon > self.max_lon
    }

    /// One rectangle, or two when the box wraps across 180°.
    pub fn rects(&self) -> Vec<Rect<f64>> {
        let rect = |min_lon: f64, max_lon: f64| {
            Rect::new(
                Coord { x: min_lon, y: self.min_lat },
                Coord { x: max_lon, y: self.max_lat },
            )
        };
        if self.crosses_antimeridian() {
            vec![rect(self.min_lon, 180.0), rect(-180.0, self.max_lon)]
        } else {
            vec![rect(self.min_lon, self.max_lon)]
        }
    }

    pub fn intersects(&self, polygon: &Polygon<f64>) -> bool {
        self.rects().iter().any(|rect| rect.intersects(polygon))
    }
}

pub fn bbox_from_polygon(polygon: &Polygon<f64>) -> Result<BBox> {
    let rect = polygon
        .bounding_rect()
        .ok_or_else(|| CatalogError::InvalidGeometry("empty polygon has no bounds".into()))?;
    Ok(BBox {
        min_lon: rect.min().x,
        min_lat: rect.min().y,
        max_lon: rect.max().x,
        max_lat: rect.max().y,
    })
}

/// Accepts a polygon, a rectangle, or a single-part multipolygon.
pub fn polygon_from_geometry(geometry: geo::Geometry<f64>) -> Result<Polygon<f64>> {
    let polygon = match geometry {
        geo::Geometry::Polygon(polygon) => polygon,
        geo::Geometry::Rect(rect) => rect.to_polygon(),
        geo::Geometry::MultiPolygon(multi) if multi.0.len() == 1 => {
            multi.0.into_iter().next().ok_or_else(|| {
                CatalogError::InvalidGeometry("multipolygon has no parts".into())
            })?
        }
        other => {
            return Err(CatalogError::InvalidGeometry(format!(
                "expected a polygon, found {}",
                geometry_name(&other)
            )))
        }
    };
    // Polygon::new closes open rings.
    let (exterior, interiors) = polygon.into_inner();
    let polygon = Polygon::new(exterior, interiors);
    if polygon.exterior().0.len() < 4 {
        return Err(CatalogError::InvalidGeometry(
            "polygon ring needs at least three distinct vertices".into(),
        ));
    }
    check_polygon_range(&polygon).map_err(|err| CatalogError::InvalidGeometry(err.to_string()))?;
    Ok(polygon.orient(Direction::Default))
}

/// True when some exterior edge jumps more than 180° of longitude, which only
/// happens when the ring is meant to wrap across the antimeridian.
pub fn crosses_antimeridian(polygon: &Polygon<f64>) -> bool {
    polygon
        .exterior()
        .lines()
        .any(|line| (line.end.x - line.start.x).abs() > 180.0)
}

/// The polygon itself, or its parts west and east of 180° when it wraps.
pub fn split_antimeridian(polygon: &Polygon<f64>) -> Vec<Polygon<f64>> {
    if !crosses_antimeridian(polygon) {
        return vec![polygon.clone()];
    }
    let unwrapped = polygon.map_coords(|c| Coord {
        x: if c.x < 0.0 { c.x + 360.0 } else { c.x },
        y: c.y,
    });
    let half = |min_x: f64, max_x: f64| {
        Rect::new(Coord { x: min_x, y: -90.0 }, Coord { x: max_x, y: 90.0 }).to_polygon()
    };
    let west = unwrapped.intersection(&half(0.0, 180.0));
    let east = unwrapped
        .intersection(&half(180.0, 360.0))
        .map_coords(|c| Coord { x: c.x - 360.0, y: c.y });
    let parts: Vec<Polygon<f64>> = west.into_iter().chain(east).collect();
    if parts.is_empty() {
        return vec![polygon.clone()];
    }
    parts
}

fn geometry_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

pub fn polygon_from_wkt(text: &str) -> Result<Polygon<f64>> {
    let geometry = geo::Geometry::<f64>::try_from_wkt_str(text.trim())
        .map_err(|err| CatalogError::InvalidGeometry(format!("invalid WKT: {err}")))?;
    polygon_from_geometry(geometry)
}

pub fn wkt_from_polygon(polygon: &Polygon<f64>) -> String {
    polygon.wkt_string()
}

/// Parses a GeoJSON geometry, or the geometry of a single feature.
pub fn geometry_from_geojson(value: &Value) -> Result<geo::Geometry<f64>> {
    let geojson = GeoJson::from_json_value(value.clone())
        .map_err(|err| CatalogError::InvalidGeometry(format!("invalid GeoJSON: {err}")))?;
    let geometry = match geojson {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| CatalogError::InvalidGeometry("feature has no geometry".into()))?,
        GeoJson::FeatureCollection(_) => {
            return Err(CatalogError::InvalidGeometry(
                "expected a single geometry, found a FeatureCollection".into(),
            ))
        }
    };
    geo::Geometry::<f64>::try_from(geometry)
        .map_err(|err| CatalogError::InvalidGeometry(err.to_string()))
}

pub fn polygon_from_geojson(value: &Value) -> Result<Polygon<f64>> {
    polygon_from_geometry(geometry_from_geojson(value)?)
}

pub fn geojson_from_polygon(polygon: &Polygon<f64>) -> Result<Value> {
    let geometry = geojson::Geometry::new(geojson::Value::from(polygon));
    Ok(serde_json::to_value(&geometry)?)
}

/// `serialize_with` adapter emitting a GeoJSON geometry object.
pub fn serialize_polygon<S: Serializer>(polygon: &Polygon<f64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    geojson::Geometry::new(geojson::Value::from(polygon)).serialize(serializer)
}

/// True when the polygon is exactly its own bounding rectangle.
pub fn is_axis_aligned_rectangle(polygon: &Polygon<f64>) -> bool {
    if !polygon.interiors().is_empty() || polygon.exterior().0.len() != 5 {
        return false;
    }
    let Some(rect) = polygon.bounding_rect() else {
        return false;
    };
    let (min, max) = (rect.min(), rect.max());
    if min.x == max.x || min.y == max.y {
        return false;
    }
    let mut corners: Vec<(bool, bool)> = Vec::with_capacity(4);
    for coord in polygon.exterior().coords().take(4) {
        let on_x = coord.x == min.x || coord.x == max.x;
        let on_y = coord.y == min.y || coord.y == max.y;
        if !(on_x && on_y) {
            return false;
        }
        let corner = (coord.x == min.x, coord.y == min.y);
        if corners.contains(&corner) {
            return false;
        }
        corners.push(corner);
    }
    true
}

/// BLAKE3 over a canonical WKB encoding: rings rounded to 1e-9, exterior
/// counter-clockwise, interiors clockwise, each ring rotated to start at its
/// lexicographically smallest vertex.
pub fn footprint_digest(polygon: &Polygon<f64>) -> String {
    let mut rings = vec![canonical_ring(polygon.exterior(), true)];
    let mut interiors: Vec<Vec<(f64, f64)>> = polygon
        .interiors()
        .iter()
        .map(|ring| canonical_ring(ring, false))
        .collect();
    interiors.sort_by(|a, b| compare_rings(a, b));
    rings.extend(interiors);

    let mut wkb = Vec::with_capacity(9 + rings.iter().map(|r| 4 + r.len() * 16).sum::<usize>());
    wkb.push(1u8);
    wkb.extend_from_slice(&3u32.to_le_bytes());
    wkb.extend_from_slice(&(rings.len() as u32).to_le_bytes());
    for ring in &rings {
        wkb.extend_from_slice(&(ring.len() as u32).to_le_bytes());
        for (x, y) in ring {
            wkb.extend_from_slice(&x.to_le_bytes());
            wkb.extend_from_slice(&y.to_le_bytes());
        }
    }
    blake3::hash(&wkb).to_hex().to_string()
}

fn canonical_ring(ring: &LineString<f64>, counter_clockwise: bool) -> Vec<(f64, f64)> {
    let snap = |v: f64| (v * 1e9).round() / 1e9 + 0.0;
    let mut points: Vec<(f64, f64)> = ring.coords().map(|c| (snap(c.x), snap(c.y))).collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.is_empty() {
        return points;
    }

    let twice_area: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.0 * b.1 - b.0 * a.1)
        .sum();
    if (twice_area > 0.0) != counter_clockwise && twice_area != 0.0 {
        points.reverse();
    }

    let start = points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)))
        .map(|(index, _)| index)
        .unwrap_or(0);
    points.rotate_left(start);
    points.push(points[0]);
    points
}

fn compare_rings(a: &[(f64, f64)], b: &[(f64, f64)]) -> std::cmp::Ordering {
    for (p, q) in a.iter().zip(b) {
        let ord = p.0.total_cmp(&q.0).then(p.1.total_cmp(&q.1));
        if ord.is_ne() {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Midday,
    Evening,
    Overnight,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 4] = [
        TimeOfDay::Morning,
        TimeOfDay::Midday,
        TimeOfDay::Evening,
        TimeOfDay::Overnight,
    ];

    /// morning 05–11, midday 11–16, evening 16–21, overnight 21–05.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=10 => TimeOfDay::Morning,
            11..=15 => TimeOfDay::Midday,
            16..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Overnight,
        }
    }

    /// Half-open local-hour ranges `[start, end)`; overnight wraps midnight.
    pub fn hour_range(&self) -> (u32, u32) {
        match self {
            TimeOfDay::Morning => (5, 11),
            TimeOfDay::Midday => (11, 16),
            TimeOfDay::Evening => (16, 21),
            TimeOfDay::Overnight => (21, 5),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Midday => "midday",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Overnight => "overnight",
        }
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Ok(TimeOfDay::Morning),
            "midday" => Ok(TimeOfDay::Midday),
            "evening" => Ok(TimeOfDay::Evening),
            "overnight" => Ok(TimeOfDay::Overnight),
            other => Err(CatalogError::InvalidInput(format!("unknown time of day '{other}'"))),
        }
    }
}

pub fn time_of_day_bucket(utc_time: DateTime<Utc>, tz: Tz) -> TimeOfDay {
    TimeOfDay::from_hour(utc_time.with_timezone(&tz).hour())
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|err| CatalogError::InvalidInput(format!("unknown timezone '{name}': {err}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use geo::polygon;
    use geo::winding_order::{Winding, WindingOrder};

    use super::*;

    fn square() -> Polygon<f64> {
        polygon![
            (x: -118.1, y: 34.0),
            (x: -118.0, y: 34.0),
            (x: -118.0, y: 34.1),
            (x: -118.1, y: 34.1),
            (x: -118.1, y: 34.0),
        ]
    }

    #[test]
    fn hexagon_area_matches_circle_of_same_radius() {
        for radius in [1.0, 10.0, 50.0] {
            let hexagon = hexagon_around(34.0, -118.0, radius).unwrap();
            let area = geodesic_area_km2(&hexagon).unwrap();
            let circle = std::f64::consts::PI * radius * radius;
            assert!(
                ((area - circle) / circle).abs() < 0.02,
                "radius {radius}: hexagon {area} vs circle {circle}"
            );
        }
    }

    #[test]
    fn area_ignores_ring_orientation() {
        let mut clockwise = square();
        clockwise.exterior_mut(|ring| ring.0.reverse());
        let area = geodesic_area_km2(&square()).unwrap();
        assert!(area > 100.0 && area < 110.0, "square area {area}");
        assert!((geodesic_area_km2(&clockwise).unwrap() - area).abs() < 0.01);

        let hexagon = hexagon_around(34.0, -118.0, 1.0).unwrap();
        assert_eq!(
            hexagon.exterior().winding_order(),
            Some(WindingOrder::CounterClockwise)
        );
        let parsed = polygon_from_wkt("POLYGON((0 0,0 1,1 1,1 0,0 0))").unwrap();
        assert_eq!(
            parsed.exterior().winding_order(),
            Some(WindingOrder::CounterClockwise)
        );
        assert!(geodesic_area_km2(&parsed).unwrap() < 13_000.0);
    }

    #[test]
    fn wrapping_polygon_splits_at_the_antimeridian() {
        let strip = polygon_from_wkt("POLYGON((179 0,-179 0,-179 1,179 1,179 0))").unwrap();
        assert!(crosses_antimeridian(&strip));
        let parts = split_antimeridian(&strip);
        assert_eq!(parts.len(), 2);

        let near = |lon: f64| {
            polygon![
                (x: lon - 0.1, y: 0.4),
                (x: lon + 0.1, y: 0.4),
                (x: lon + 0.1, y: 0.6),
                (x: lon - 0.1, y: 0.6),
                (x: lon - 0.1, y: 0.4),
            ]
        };
        assert!(parts.iter().any(|part| part.intersects(&near(179.5))));
        assert!(parts.iter().any(|part| part.intersects(&near(-179.5))));
        assert!(!parts.iter().any(|part| part.intersects(&near(0.0))));

        let area = geodesic_area_km2(&strip).unwrap();
        assert!(area > 20_000.0 && area < 26_000.0, "strip area {area}");

        assert!(!crosses_antimeridian(&square()));
        assert_eq!(split_antimeridian(&square()), vec![square()]);
    }

    #[test]
    fn hexagon_near_pole_is_closed() {
        let hexagon = hexagon_around(89.9, 45.0, 5.0).unwrap();
        let ring = &hexagon.exterior().0;
        assert_eq!(ring.len(), 7);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn buffers_reject_out_of_range_input() {
        assert!(matches!(
            hexagon_around(91.0, 0.0, 1.0),
            Err(CatalogError::GeodesicOutOfRange(_))
        ));
        assert!(matches!(
            circle_around(10.0, 10.0, 0.0, 64),
            Err(CatalogError::GeodesicOutOfRange(_))
        ));
    }

    #[test]
    fn centroid_is_rounded_to_five_places() {
        let (lat, lon) = centroid(&square()).unwrap();
        assert_eq!(lat, 34.05);
        assert_eq!(lon, -118.05);
    }

    #[test]
    fn wkt_round_trip_preserves_vertices() {
        let text = "POLYGON((-118.1 34,-118 34,-118 34.1,-118.1 34.1,-118.1 34))";
        let polygon = polygon_from_wkt(text).unwrap();
        let again = polygon_from_wkt(&wkt_from_polygon(&polygon)).unwrap();
        assert_eq!(polygon, again);
        assert_eq!(footprint_digest(&polygon), footprint_digest(&square()));
    }

    #[test]
    fn wkt_rejects_points_and_garbage() {
        assert!(matches!(
            polygon_from_wkt("POINT(1 2)"),
            Err(CatalogError::InvalidGeometry(_))
        ));
        assert!(polygon_from_wkt("POLYGON((oops))").is_err());
    }

    #[test]
    fn digest_ignores_rotation_and_orientation() {
        let rotated = polygon![
            (x: -118.0, y: 34.1),
            (x: -118.1, y: 34.1),
            (x: -118.1, y: 34.0),
            (x: -118.0, y: 34.0),
            (x: -118.0, y: 34.1),
        ];
        let mut clockwise = square();
        clockwise.exterior_mut(|ring| ring.0.reverse());
        let digest = footprint_digest(&square());
        assert_eq!(digest, footprint_digest(&rotated));
        assert_eq!(digest, footprint_digest(&clockwise));
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn antimeridian_bbox_splits_into_two_rects() {
        let bbox = BBox::new(170.0, -10.0, -170.0, 10.0).unwrap();
        assert!(bbox.crosses_antimeridian());
        assert_eq!(bbox.rects().len(), 2);

        let east_of_dateline = polygon![
            (x: -179.5, y: 0.0),
            (x: -179.0, y: 0.0),
            (x: -179.0, y: 1.0),
            (x: -179.5, y: 0.0),
        ];
        assert!(bbox.intersects(&east_of_dateline));
        let far_away = polygon![
            (x: 10.0, y: 0.0),
            (x: 11.0, y: 0.0),
            (x: 11.0, y: 1.0),
            (x: 10.0, y: 0.0),
        ];
        assert!(!bbox.intersects(&far_away));
    }

    #[test]
    fn geojson_point_is_not_a_polygon() {
        let point = serde_json::json!({"type": "Point", "coordinates": [1.0, 2.0]});
        assert!(matches!(
            geometry_from_geojson(&point).unwrap(),
            geo::Geometry::Point(_)
        ));
        assert!(polygon_from_geojson(&point).is_err());

        let value = geojson_from_polygon(&square()).unwrap();
        assert_eq!(value["type"], "Polygon");
        assert_eq!(polygon_from_geojson(&value).unwrap(), square());
    }

    #[test]
    fn rectangle_detection() {
        assert!(is_axis_aligned_rectangle(&square()));
        let hexagon = hexagon_around(0.0, 0.0, 1.0).unwrap();
        assert!(!is_axis_aligned_rectangle(&hexagon));
    }

    #[test]
    fn time_of_day_wraps_midnight() {
        let tz = parse_timezone("America/Los_Angeles").unwrap();
        // 13:30 UTC is 06:30 PDT.
        let morning = Utc.with_ymd_and_hms(2024, 6, 1, 13, 30, 0).unwrap();
        assert_eq!(time_of_day_bucket(morning, tz), TimeOfDay::Morning);
        // 06:00 UTC is 23:00 PDT the previous day.
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap();
        assert_eq!(time_of_day_bucket(late, tz), TimeOfDay::Overnight);
        assert_eq!(TimeOfDay::from_hour(4), TimeOfDay::Overnight);
        assert_eq!(TimeOfDay::from_hour(16), TimeOfDay::Evening);
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
