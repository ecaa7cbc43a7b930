use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use geo::Polygon;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::hierarchy::{prune_to_matches, GroupTree, HierarchyNode, RollupBuilder, SiteRollup};
use super::model::{Group, GroupSite, NewGroup, NewSite, Site, SiteFilter, SiteType};
use super::stats::{self, SiteStats};
use crate::catalog::{PageRequest, Paged, SpatialFilter};
use crate::error::{CatalogError, Result};
use crate::geometry;
use crate::store::Store;

/// Radius of the hexagon a point site is expanded into.
pub const POINT_SITE_RADIUS_KM: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SiteInput {
    pub name: String,
    /// GeoJSON geometry, feature or feature collection with one polygon or point.
    pub geometry: Value,
    #[serde(default)]
    pub site_type: Option<SiteType>,
    #[serde(default)]
    pub notification: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SiteChanges {
    pub name: Option<String>,
    pub geometry: Option<Value>,
    pub site_type: Option<SiteType>,
    pub notification: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GroupInput {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notification: bool,
}

/// `parent_id: Some(None)` detaches the group to the top level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GroupChanges {
    pub name: Option<String>,
    #[serde(with = "double_option")]
    pub parent_id: Option<Option<i64>>,
    pub description: Option<String>,
    pub notification: Option<bool>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<i64>::deserialize(deserializer).map(Some)
    }
}

/// One uploaded point row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointRow {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Created,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkRowResult {
    pub row: usize,
    pub name: String,
    pub status: RowStatus,
    pub site_id: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSummary {
    #[serde(flatten)]
    pub site: Site,
    pub stats: SiteStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    #[serde(flatten)]
    pub group: Group,
    pub site_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRollup {
    pub group_id: i64,
    pub surface_area_sq_km: f64,
    pub total_objects: i64,
    pub sites: Vec<SiteRollup>,
}

/// Resolves site geometry input into a footprint and its type. Points become
/// hexagons; polygons equal to their bounding box are rectangles unless a
/// type was given.
pub fn site_footprint(input: &Value, requested: Option<SiteType>) -> Result<(Polygon<f64>, SiteType)> {
    match geometry::geometry_from_geojson(input)? {
        geo::Geometry::Point(point) => {
            let hexagon = geometry::hexagon_around(point.y(), point.x(), POINT_SITE_RADIUS_KM)?;
            Ok((hexagon, SiteType::Point))
        }
        other => {
            let polygon = geometry::polygon_from_geometry(other)?;
            let site_type = requested.unwrap_or_else(|| {
                if geometry::is_axis_aligned_rectangle(&polygon) {
                    SiteType::Rectangle
                } else {
                    SiteType::Polygon
                }
            });
            Ok((polygon, site_type))
        }
    }
}

fn clean_name(name: &str, what: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CatalogError::InvalidInput(format!("{what} name cannot be empty")));
    }
    Ok(name.to_string())
}

#[derive(Clone)]
pub struct SitesService {
    store: Arc<dyn Store>,
}

impl SitesService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn require_site(&self, owner: &str, site_id: i64) -> Result<Site> {
        self.store
            .get_site(owner, site_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("site {site_id}")))
    }

    async fn require_group(&self, owner: &str, group_id: i64) -> Result<Group> {
        self.store
            .get_group(owner, group_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("group {group_id}")))
    }

    async fn tree(&self, owner: &str) -> Result<GroupTree> {
        Ok(GroupTree::new(self.store.list_groups(owner).await?))
    }

    fn new_site(owner: &str, name: String, footprint: Polygon<f64>, site_type: SiteType, notification: bool) -> Result<NewSite> {
        let area_sq_km = geometry::geodesic_area_km2(&footprint)?;
        let (centroid_lat, centroid_lon) = geometry::centroid(&footprint)?;
        Ok(NewSite {
            owner: owner.to_string(),
            name,
            footprint,
            centroid_lat,
            centroid_lon,
            site_type,
            area_sq_km,
            notification,
        })
    }

    pub async fn add_site(&self, owner: &str, input: SiteInput) -> Result<Site> {
        let name = clean_name(&input.name, "site")?;
        let (footprint, site_type) = site_footprint(&input.geometry, input.site_type)?;
        let site = self
            .store
            .insert_site(Self::new_site(owner, name, footprint, site_type, input.notification)?)
            .await?;
        info!(owner, site_id = site.id, area_sq_km = site.area_sq_km, "site added");
        Ok(site)
    }

    pub async fn update_site(&self, owner: &str, site_id: i64, changes: SiteChanges) -> Result<Site> {
        let mut site = self.require_site(owner, site_id).await?;
        if let Some(name) = &changes.name {
            site.name = clean_name(name, "site")?;
        }
        if let Some(geometry) = &changes.geometry {
            let (footprint, site_type) = site_footprint(geometry, changes.site_type)?;
            site.area_sq_km = geometry::geodesic_area_km2(&footprint)?;
            let (lat, lon) = geometry::centroid(&footprint)?;
            site.centroid_lat = lat;
            site.centroid_lon = lon;
            site.footprint = footprint;
            site.site_type = site_type;
        } else if let Some(site_type) = changes.site_type {
            site.site_type = site_type;
        }
        if let Some(notification) = changes.notification {
            site.notification = notification;
        }
        self.store.update_site(&site).await
    }

    pub async fn delete_site(&self, owner: &str, site_id: i64) -> Result<()> {
        if !self.store.soft_delete_site(owner, site_id).await? {
            return Err(CatalogError::NotFound(format!("site {site_id}")));
        }
        info!(owner, site_id, "site deleted");
        Ok(())
    }

    pub async fn add_group(&self, owner: &str, input: GroupInput) -> Result<Group> {
        let name = clean_name(&input.name, "group")?;
        if let Some(parent) = input.parent_id {
            self.require_group(owner, parent).await?;
        }
        self.store
            .insert_group(NewGroup {
                owner: owner.to_string(),
                name,
                parent_id: input.parent_id,
                description: input.description,
                notification: input.notification,
            })
            .await
    }

    pub async fn update_group(&self, owner: &str, group_id: i64, changes: GroupChanges) -> Result<Group> {
        let tree = self.tree(owner).await?;
        let mut group = tree
            .get(group_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("group {group_id}")))?;

        if let Some(name) = &changes.name {
            group.name = clean_name(name, "group")?;
        }
        if let Some(parent) = changes.parent_id {
            if let Some(parent_id) = parent {
                if !tree.contains(parent_id) {
                    return Err(CatalogError::NotFound(format!("group {parent_id}")));
                }
                if tree.would_cycle(group_id, parent_id) {
                    return Err(CatalogError::InvalidInput(format!(
                        "moving group {group_id} under {parent_id} would create a cycle"
                    )));
                }
            }
            group.parent_id = parent;
        }
        if let Some(description) = changes.description {
            group.description = Some(description);
        }
        if let Some(notification) = changes.notification {
            group.notification = notification;
        }
        self.store.update_group(&group).await
    }

    /// Tombstones the group, every subgroup and their assignments.
    pub async fn delete_group(&self, owner: &str, group_id: i64) -> Result<u64> {
        let tree = self.tree(owner).await?;
        if !tree.contains(group_id) {
            return Err(CatalogError::NotFound(format!("group {group_id}")));
        }
        let ids = tree.descendants(group_id);
        let removed = self.store.soft_delete_groups(owner, &ids).await?;
        info!(owner, group_id, removed, "group subtree deleted");
        Ok(removed)
    }

    /// Idempotent: an existing active assignment is returned unchanged.
    pub async fn assign_site(&self, owner: &str, group_id: i64, site_id: i64) -> Result<(GroupSite, bool)> {
        self.require_group(owner, group_id).await?;
        let site = self.require_site(owner, site_id).await?;
        self.store.assign_site(group_id, site_id, site.area_sq_km).await
    }

    pub async fn unassign_site(&self, owner: &str, group_id: i64, site_id: i64) -> Result<()> {
        self.require_group(owner, group_id).await?;
        if !self.store.unassign_site(group_id, site_id).await? {
            return Err(CatalogError::NotFound(format!(
                "assignment of site {site_id} to group {group_id}"
            )));
        }
        Ok(())
    }

    pub async fn list_groups(&self, owner: &str) -> Result<Vec<GroupSummary>> {
        let groups = self.store.list_groups(owner).await?;
        let ids: Vec<i64> = groups.iter().map(|g| g.id).collect();
        let assignments = self.store.group_sites(&ids).await?;
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for assignment in &assignments {
            *counts.entry(assignment.group_id).or_default() += 1;
        }
        Ok(groups
            .into_iter()
            .map(|group| GroupSummary {
                site_count: counts.get(&group.id).copied().unwrap_or(0),
                group,
            })
            .collect())
    }

    /// Loads only the heatmap window and the last two capture days, never the
    /// site's full acquisition history.
    pub async fn site_stats(&self, site: &Site, now: DateTime<Utc>) -> Result<SiteStats> {
        let area = SpatialFilter::Polygon(site.footprint.clone());
        let (acquisition_count, most_recent, most_recent_clear) = futures::try_join!(
            self.store.count_intersecting(&area),
            self.store.newest_in(&area),
            self.store.newest_clear_in(&area, 0.0),
        )?;

        let mut since = stats::heatmap_start(now.date_naive());
        if let Some(latest) = &most_recent {
            let latest_day = stats::start_of_day(latest.acquisition_datetime);
            let prior = self.store.latest_acquisition_before(&area, latest_day).await?;
            since = since.min(prior.unwrap_or(latest_day));
        }
        let times = self.store.acquisition_times(&area, since).await?;
        Ok(SiteStats {
            acquisition_count,
            most_recent,
            most_recent_clear,
            records_per_acquisition: stats::records_per_acquisition(&times),
            time_between_acquisitions: stats::time_between_acquisitions(&times),
            heatmap: stats::heatmap(&times, now.date_naive()),
        })
    }

    pub async fn list_sites_for_owner(
        &self,
        owner: &str,
        filter: &SiteFilter,
        page: PageRequest,
    ) -> Result<Paged<SiteSummary>> {
        self.list_sites_for_owner_at(owner, filter, page, Utc::now()).await
    }

    pub async fn list_sites_for_owner_at(
        &self,
        owner: &str,
        filter: &SiteFilter,
        page: PageRequest,
        now: DateTime<Utc>,
    ) -> Result<Paged<SiteSummary>> {
        let (sites, total) = self.store.list_sites(owner, filter, page).await?;
        let stats = try_join_all(sites.iter().map(|site| self.site_stats(site, now))).await?;
        let items = sites
            .into_iter()
            .zip(stats)
            .map(|(site, stats)| SiteSummary { site, stats })
            .collect();
        Ok(Paged::new(items, total, page))
    }

    /// Assignments and object counts for every group in `tree`.
    async fn rollup_inputs(&self, owner: &str, tree: &GroupTree) -> Result<(Vec<GroupSite>, HashMap<i64, i64>)> {
        let ids: Vec<i64> = tree.groups().map(|g| g.id).collect();
        let assignments = self.store.group_sites(&ids).await?;
        let site_ids: HashSet<i64> = assignments.iter().map(|a| a.site_id).collect();

        let counts = try_join_all(site_ids.into_iter().map(|site_id| async move {
            let count = match self.store.get_site(owner, site_id).await? {
                Some(site) => {
                    self.store
                        .count_intersecting(&SpatialFilter::Polygon(site.footprint))
                        .await?
                }
                None => {
                    warn!(owner, site_id, "assignment references a missing site");
                    0
                }
            };
            Ok::<_, CatalogError>((site_id, count))
        }))
        .await?;
        Ok((assignments, counts.into_iter().collect()))
    }

    /// The subtree under `group_id` with surface-area and object rollups.
    pub async fn full_hierarchy(&self, owner: &str, group_id: i64) -> Result<HierarchyNode> {
        let tree = self.tree(owner).await?;
        if !tree.contains(group_id) {
            return Err(CatalogError::NotFound(format!("group {group_id}")));
        }
        let (assignments, counts) = self.rollup_inputs(owner, &tree).await?;
        let mut builder = RollupBuilder::new(&tree, &assignments, &counts);
        builder
            .node(group_id, None)
            .ok_or_else(|| CatalogError::NotFound(format!("group {group_id}")))
    }

    /// Each matching group's root ancestor, pruned to branches that contain a match.
    pub async fn search_hierarchy(&self, owner: &str, group_name: &str) -> Result<Vec<HierarchyNode>> {
        let tree = self.tree(owner).await?;
        let matches = prune_to_matches(&tree, group_name);
        if matches.is_empty() {
            return Ok(Vec::new());
        }
        let (assignments, counts) = self.rollup_inputs(owner, &tree).await?;
        let mut builder = RollupBuilder::new(&tree, &assignments, &counts);
        Ok(matches
            .iter()
            .filter_map(|(root, keep)| builder.node(*root, Some(keep)))
            .collect())
    }

    pub async fn surface_area_recursive(&self, owner: &str, group_id: i64) -> Result<GroupRollup> {
        let node = self.full_hierarchy(owner, group_id).await?;
        let mut sites = Vec::new();
        collect_sites(&node, &mut sites);
        Ok(GroupRollup {
            group_id,
            surface_area_sq_km: node.surface_area_sq_km,
            total_objects: node.total_objects,
            sites,
        })
    }

    /// Each point becomes a 1 km hexagon site; rows fail independently.
    pub async fn bulk_add_from_points(
        &self,
        owner: &str,
        rows: Vec<PointRow>,
        group_id: Option<i64>,
    ) -> Result<Vec<BulkRowResult>> {
        if let Some(group_id) = group_id {
            self.require_group(owner, group_id).await?;
        }

        let mut results = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let outcome = self.add_point_site(owner, &row, group_id).await;
            let result = match outcome {
                Ok(site_id) => BulkRowResult {
                    row: index + 1,
                    name: row.name,
                    status: RowStatus::Created,
                    site_id: Some(site_id),
                    reason: None,
                },
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => BulkRowResult {
                    row: index + 1,
                    name: row.name,
                    status: RowStatus::Failed,
                    site_id: None,
                    reason: Some(err.to_string()),
                },
            };
            results.push(result);
        }
        let created = results.iter().filter(|r| r.status == RowStatus::Created).count();
        info!(owner, created, failed = results.len() - created, "bulk site intake finished");
        Ok(results)
    }

    async fn add_point_site(&self, owner: &str, row: &PointRow, group_id: Option<i64>) -> Result<i64> {
        let name = clean_name(&row.name, "site")?;
        if !(-90.0..=90.0).contains(&row.lat) || !(-180.0..=180.0).contains(&row.lon) {
            return Err(CatalogError::InvalidInput(format!(
                "coordinate ({}, {}) is outside WGS84 bounds",
                row.lat, row.lon
            )));
        }
        let footprint = geometry::hexagon_around(row.lat, row.lon, POINT_SITE_RADIUS_KM)?;
        let site = self
            .store
            .insert_site(Self::new_site(owner, name, footprint, SiteType::Point, false)?)
            .await?;
        if let Some(group_id) = group_id {
            self.store.assign_site(group_id, site.id, site.area_sq_km).await?;
        }
        Ok(site.id)
    }
}

fn collect_sites(node: &HierarchyNode, out: &mut Vec<SiteRollup>) {
    out.extend(node.sites.iter().cloned());
    for child in &node.children {
        collect_sites(child, out);
    }
}
