use chrono::{DateTime, Utc};
use geo::Polygon;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Point,
    Rectangle,
    Polygon,
}

impl SiteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteType::Point => "point",
            SiteType::Rectangle => "rectangle",
            SiteType::Polygon => "polygon",
        }
    }
}

impl std::str::FromStr for SiteType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "point" => Ok(SiteType::Point),
            "rectangle" => Ok(SiteType::Rectangle),
            "polygon" => Ok(SiteType::Polygon),
            other => Err(CatalogError::InvalidInput(format!("unknown site type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Site {
    pub id: i64,
    pub owner: String,
    pub name: String,
    #[serde(serialize_with = "geometry::serialize_polygon")]
    pub footprint: Polygon<f64>,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub site_type: SiteType,
    pub area_sq_km: f64,
    pub notification: bool,
    pub new_updates_count: i64,
    pub last_notification_scan_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSite {
    pub owner: String,
    pub name: String,
    pub footprint: Polygon<f64>,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub site_type: SiteType,
    pub area_sq_km: f64,
    pub notification: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub parent_id: Option<i64>,
    pub description: Option<String>,
    pub notification: bool,
    pub new_updates_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub owner: String,
    pub name: String,
    pub parent_id: Option<i64>,
    pub description: Option<String>,
    pub notification: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSite {
    pub id: i64,
    pub group_id: i64,
    pub site_id: i64,
    pub area_sq_km_snapshot: f64,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteFilter {
    pub name_contains: Option<String>,
    pub site_type: Option<SiteType>,
    pub notification: Option<bool>,
    pub group_id: Option<i64>,
}

impl SiteFilter {
    /// Attribute predicates; group membership is resolved by the store.
    pub fn matches(&self, site: &Site) -> bool {
        let name_ok = self.name_contains.as_deref().map_or(true, |needle| {
            site.name.to_lowercase().contains(&needle.to_lowercase())
        });
        name_ok
            && self.site_type.map_or(true, |kind| site.site_type == kind)
            && self.notification.map_or(true, |flag| site.notification == flag)
    }
}

/// Conditional counter bump applied by the notification watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCounterUpdate {
    pub site_id: i64,
    /// Scan marker read before counting; the write only lands if it is unchanged.
    pub expected_last_scan: Option<DateTime<Utc>>,
    pub scanned_at: DateTime<Utc>,
    pub delta: i64,
    pub group_ids: Vec<i64>,
}
