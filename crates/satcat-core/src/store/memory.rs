//! In-process store used by tests, dry runs and local development.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo::{Intersects, Polygon};
use satcat_vendors::Vendor;
use tokio::sync::RwLock;

use super::{CatalogStore, HistoryStore, SiteStore};
use crate::catalog::{
    CaptureFilter, CaptureRecord, DailyVendorCount, PageRequest, PreparedCapture, SortKey,
    SpatialFilter, UpsertOutcome,
};
use crate::error::{CatalogError, Result};
use crate::history::{HistoryFilter, IngestionCursor, NewHistoryEntry};
use crate::sites::model::{Group, GroupSite, NewGroup, NewSite, Site, SiteCounterUpdate, SiteFilter};

#[derive(Debug)]
struct Tombstoned<T> {
    row: T,
    is_deleted: bool,
}

impl<T> Tombstoned<T> {
    fn active(row: T) -> Self {
        Self {
            row,
            is_deleted: false,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    captures: Vec<CaptureRecord>,
    history: Vec<IngestionCursor>,
    sites: Vec<Tombstoned<Site>>,
    groups: Vec<Tombstoned<Group>>,
    group_sites: Vec<Tombstoned<GroupSite>>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn active_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| !s.is_deleted).map(|s| &s.row)
    }

    fn active_groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter(|g| !g.is_deleted).map(|g| &g.row)
    }

    fn active_group_sites(&self) -> impl Iterator<Item = &GroupSite> {
        self.group_sites.iter().filter(|gs| !gs.is_deleted).map(|gs| &gs.row)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of capture rows, active or not.
    pub async fn capture_count(&self) -> usize {
        self.state.read().await.captures.len()
    }

    async fn spatial_matches(&self, area: &SpatialFilter) -> Result<Vec<CaptureRecord>> {
        let polygons = area.to_polygons()?;
        let state = self.state.read().await;
        Ok(state
            .captures
            .iter()
            .filter(|c| c.is_active && intersects_any(&polygons, &c.footprint))
            .cloned()
            .collect())
    }

    async fn filtered(&self, filter: &CaptureFilter) -> Result<Vec<CaptureRecord>> {
        filter.validate()?;
        let mut rows = match &filter.spatial {
            Some(area) => self.spatial_matches(area).await?,
            None => {
                let state = self.state.read().await;
                state.captures.iter().filter(|c| c.is_active).cloned().collect()
            }
        };
        rows.retain(|c| filter.matches_attributes(c));
        Ok(rows)
    }
}

fn intersects_any(polygons: &[Polygon<f64>], footprint: &Polygon<f64>) -> bool {
    polygons.iter().any(|polygon| polygon.intersects(footprint))
}

/// Postgres ordering: NULLs last ascending, first descending.
fn compare_optional(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}

fn sort_captures(captures: &mut [CaptureRecord], key: SortKey, descending: bool) {
    captures.sort_by(|a, b| {
        let primary = match key {
            SortKey::AcquisitionDatetime => a.acquisition_datetime.cmp(&b.acquisition_datetime),
            SortKey::Vendor => a.vendor.as_str().cmp(b.vendor.as_str()),
            SortKey::Sensor => compare_optional(&a.sensor, &b.sensor),
        };
        let primary = if descending { primary.reverse() } else { primary };
        primary
            .then_with(|| a.vendor.as_str().cmp(b.vendor.as_str()))
            .then_with(|| a.vendor_id.cmp(&b.vendor_id))
    });
}

fn page_slice<T: Clone>(rows: &[T], page: PageRequest) -> Vec<T> {
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit()).unwrap_or(0);
    rows.iter().skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn upsert(&self, capture: PreparedCapture) -> Result<UpsertOutcome> {
        let record = &capture.record;
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .captures
            .iter_mut()
            .find(|c| c.vendor == record.vendor && c.vendor_id == record.vendor_id)
        {
            let region = capture.centroid_region.clone().or_else(|| existing.centroid_region.clone());
            let local = capture.centroid_local.clone().or_else(|| existing.centroid_local.clone());
            let thumbnail = record.thumbnail_url.clone().or_else(|| existing.thumbnail_url.clone());
            let changed = existing.metadata != record.metadata
                || !existing.is_active
                || existing.centroid_region != region
                || existing.centroid_local != local
                || existing.thumbnail_url != thumbnail;
            if !changed {
                return Ok(UpsertOutcome::DuplicateIgnored);
            }
            existing.metadata = record.metadata.clone();
            existing.is_active = true;
            existing.centroid_region = region;
            existing.centroid_local = local;
            existing.thumbnail_url = thumbnail;
            return Ok(UpsertOutcome::UpdatedInPlace);
        }

        let reissued = state.captures.iter().any(|c| {
            c.vendor == record.vendor
                && c.footprint_digest == capture.footprint_digest
                && c.acquisition_datetime == record.acquisition_datetime
        });
        if reissued {
            return Ok(UpsertOutcome::DuplicateIgnored);
        }

        let id = state.next_id();
        let holdback_seconds = capture.holdback_seconds();
        let record = capture.record;
        state.captures.push(CaptureRecord {
            id,
            vendor: record.vendor,
            vendor_id: record.vendor_id,
            acquisition_datetime: record.acquisition_datetime,
            publication_datetime: record.publication_datetime,
            holdback_seconds,
            footprint: record.footprint,
            footprint_digest: capture.footprint_digest,
            centroid_lat: capture.centroid_lat,
            centroid_lon: capture.centroid_lon,
            area_sq_km: capture.area_sq_km,
            cloud_cover: record.cloud_cover,
            gsd: record.gsd,
            off_nadir: record.off_nadir,
            azimuth_angle: record.azimuth_angle,
            illumination_azimuth: record.illumination_azimuth,
            illumination_elevation: record.illumination_elevation,
            sun_elevation: record.sun_elevation,
            constellation: record.constellation,
            platform: record.platform,
            sensor: record.sensor,
            metadata: record.metadata,
            centroid_region: capture.centroid_region,
            centroid_local: capture.centroid_local,
            thumbnail_url: record.thumbnail_url,
            image_url: None,
            is_active: true,
            is_purchased: false,
            image_uploaded: false,
            created_at: Utc::now(),
        });
        Ok(UpsertOutcome::Inserted)
    }

    async fn find_capture(&self, vendor: Vendor, vendor_id: &str) -> Result<Option<CaptureRecord>> {
        let state = self.state.read().await;
        Ok(state
            .captures
            .iter()
            .find(|c| c.vendor == vendor && c.vendor_id == vendor_id)
            .cloned())
    }

    async fn search(&self, filter: &CaptureFilter, page: PageRequest) -> Result<(Vec<CaptureRecord>, i64)> {
        let mut rows = self.filtered(filter).await?;
        sort_captures(&mut rows, filter.sort, filter.descending);
        let total = rows.len() as i64;
        Ok((page_slice(&rows, page), total))
    }

    async fn window_count(
        &self,
        area: &SpatialFilter,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> Result<i64> {
        let rows = self.spatial_matches(area).await?;
        Ok(rows
            .iter()
            .filter(|c| c.acquisition_datetime >= t0 && c.acquisition_datetime < t1)
            .count() as i64)
    }

    async fn count_intersecting(&self, area: &SpatialFilter) -> Result<i64> {
        Ok(self.spatial_matches(area).await?.len() as i64)
    }

    async fn oldest_in(&self, area: &SpatialFilter) -> Result<Option<CaptureRecord>> {
        let mut rows = self.spatial_matches(area).await?;
        sort_captures(&mut rows, SortKey::AcquisitionDatetime, false);
        Ok(rows.into_iter().next())
    }

    async fn newest_in(&self, area: &SpatialFilter) -> Result<Option<CaptureRecord>> {
        let mut rows = self.spatial_matches(area).await?;
        sort_captures(&mut rows, SortKey::AcquisitionDatetime, true);
        Ok(rows.into_iter().next())
    }

    async fn newest_clear_in(&self, area: &SpatialFilter, cloud_max: f64) -> Result<Option<CaptureRecord>> {
        let mut rows = self.spatial_matches(area).await?;
        rows.retain(|c| c.is_clear(cloud_max));
        sort_captures(&mut rows, SortKey::AcquisitionDatetime, true);
        Ok(rows.into_iter().next())
    }

    async fn acquisition_times(&self, area: &SpatialFilter, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let mut times: Vec<_> = self
            .spatial_matches(area)
            .await?
            .into_iter()
            .map(|c| c.acquisition_datetime)
            .filter(|acquired| *acquired >= since)
            .collect();
        times.sort();
        Ok(times)
    }

    async fn latest_acquisition_before(
        &self,
        area: &SpatialFilter,
        before: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .spatial_matches(area)
            .await?
            .into_iter()
            .map(|c| c.acquisition_datetime)
            .filter(|acquired| *acquired < before)
            .max())
    }

    async fn daily_counts(&self, filter: &CaptureFilter) -> Result<Vec<DailyVendorCount>> {
        let everything = self.filtered(filter).await?;
        let mut counts: BTreeMap<(chrono::NaiveDate, Vendor), i64> = BTreeMap::new();
        for capture in everything {
            *counts
                .entry((capture.acquisition_datetime.date_naive(), capture.vendor))
                .or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((date, vendor), count)| DailyVendorCount { date, vendor, count })
            .collect())
    }

    async fn mark_image_uploaded(&self, vendor: Vendor, vendor_id: &str, image_url: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(capture) = state
            .captures
            .iter_mut()
            .find(|c| c.vendor == vendor && c.vendor_id == vendor_id)
        else {
            return Ok(false);
        };
        capture.image_uploaded = true;
        capture.image_url = Some(image_url.to_string());
        Ok(true)
    }

    async fn set_active(&self, vendor: Vendor, vendor_id: &str, active: bool) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(capture) = state
            .captures
            .iter_mut()
            .find(|c| c.vendor == vendor && c.vendor_id == vendor_id)
        else {
            return Ok(false);
        };
        capture.is_active = active;
        Ok(true)
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn latest_cursor(&self, vendor: Vendor) -> Result<Option<IngestionCursor>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|row| row.vendor == vendor && row.advances_cursor())
            .max_by(|a, b| a.window_end.cmp(&b.window_end).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<IngestionCursor> {
        if entry.window_end < entry.window_start {
            return Err(CatalogError::InvalidInput(format!(
                "window end {} precedes start {}",
                entry.window_end, entry.window_start
            )));
        }
        let mut state = self.state.write().await;
        let row = IngestionCursor {
            id: state.next_id(),
            vendor: entry.vendor,
            mode: entry.mode,
            outcome: entry.outcome,
            window_start: entry.window_start,
            window_end: entry.window_end,
            counts: entry.counts,
            message: entry.message,
            created_at: Utc::now(),
        };
        state.history.push(row.clone());
        Ok(row)
    }

    async fn list_history(
        &self,
        filter: &HistoryFilter,
        page: PageRequest,
    ) -> Result<(Vec<IngestionCursor>, i64)> {
        let state = self.state.read().await;
        let mut rows: Vec<IngestionCursor> =
            state.history.iter().filter(|row| filter.matches(row)).cloned().collect();
        rows.sort_by(|a, b| b.window_end.cmp(&a.window_end).then(b.id.cmp(&a.id)));
        let total = rows.len() as i64;
        Ok((page_slice(&rows, page), total))
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn insert_site(&self, site: NewSite) -> Result<Site> {
        let mut state = self.state.write().await;
        if state
            .active_sites()
            .any(|s| s.owner == site.owner && s.name == site.name)
        {
            return Err(CatalogError::Conflict(format!("site '{}' already exists", site.name)));
        }
        let now = Utc::now();
        let row = Site {
            id: state.next_id(),
            owner: site.owner,
            name: site.name,
            footprint: site.footprint,
            centroid_lat: site.centroid_lat,
            centroid_lon: site.centroid_lon,
            site_type: site.site_type,
            area_sq_km: site.area_sq_km,
            notification: site.notification,
            new_updates_count: 0,
            last_notification_scan_at: None,
            created_at: now,
            updated_at: now,
        };
        state.sites.push(Tombstoned::active(row.clone()));
        Ok(row)
    }

    async fn update_site(&self, site: &Site) -> Result<Site> {
        let mut state = self.state.write().await;
        if state
            .active_sites()
            .any(|s| s.owner == site.owner && s.name == site.name && s.id != site.id)
        {
            return Err(CatalogError::Conflict(format!("site '{}' already exists", site.name)));
        }
        let stored = state
            .sites
            .iter_mut()
            .find(|s| !s.is_deleted && s.row.id == site.id && s.row.owner == site.owner)
            .ok_or_else(|| CatalogError::NotFound(format!("site {}", site.id)))?;
        stored.row.name = site.name.clone();
        stored.row.footprint = site.footprint.clone();
        stored.row.centroid_lat = site.centroid_lat;
        stored.row.centroid_lon = site.centroid_lon;
        stored.row.site_type = site.site_type;
        stored.row.area_sq_km = site.area_sq_km;
        stored.row.notification = site.notification;
        stored.row.updated_at = Utc::now();
        Ok(stored.row.clone())
    }

    async fn get_site(&self, owner: &str, site_id: i64) -> Result<Option<Site>> {
        let state = self.state.read().await;
        let found = state
            .active_sites()
            .find(|s| s.id == site_id && s.owner == owner)
            .cloned();
        Ok(found)
    }

    async fn list_sites(&self, owner: &str, filter: &SiteFilter, page: PageRequest) -> Result<(Vec<Site>, i64)> {
        let state = self.state.read().await;
        let members: Option<Vec<i64>> = filter.group_id.map(|group_id| {
            state
                .active_group_sites()
                .filter(|gs| gs.group_id == group_id)
                .map(|gs| gs.site_id)
                .collect()
        });
        let mut rows: Vec<Site> = state
            .active_sites()
            .filter(|s| s.owner == owner && filter.matches(s))
            .filter(|s| members.as_ref().map_or(true, |ids| ids.contains(&s.id)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        let total = rows.len() as i64;
        Ok((page_slice(&rows, page), total))
    }

    async fn soft_delete_site(&self, owner: &str, site_id: i64) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(site) = state
            .sites
            .iter_mut()
            .find(|s| !s.is_deleted && s.row.id == site_id && s.row.owner == owner)
        else {
            return Ok(false);
        };
        site.is_deleted = true;
        for assignment in state.group_sites.iter_mut().filter(|gs| gs.row.site_id == site_id) {
            assignment.is_deleted = true;
        }
        Ok(true)
    }

    async fn insert_group(&self, group: NewGroup) -> Result<Group> {
        let mut state = self.state.write().await;
        if state
            .active_groups()
            .any(|g| g.owner == group.owner && g.name == group.name)
        {
            return Err(CatalogError::Conflict(format!("group '{}' already exists", group.name)));
        }
        let now = Utc::now();
        let row = Group {
            id: state.next_id(),
            owner: group.owner,
            name: group.name,
            parent_id: group.parent_id,
            description: group.description,
            notification: group.notification,
            new_updates_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.groups.push(Tombstoned::active(row.clone()));
        Ok(row)
    }

    async fn update_group(&self, group: &Group) -> Result<Group> {
        let mut state = self.state.write().await;
        if state
            .active_groups()
            .any(|g| g.owner == group.owner && g.name == group.name && g.id != group.id)
        {
            return Err(CatalogError::Conflict(format!("group '{}' already exists", group.name)));
        }
        let stored = state
            .groups
            .iter_mut()
            .find(|g| !g.is_deleted && g.row.id == group.id && g.row.owner == group.owner)
            .ok_or_else(|| CatalogError::NotFound(format!("group {}", group.id)))?;
        stored.row.name = group.name.clone();
        stored.row.parent_id = group.parent_id;
        stored.row.description = group.description.clone();
        stored.row.notification = group.notification;
        stored.row.updated_at = Utc::now();
        Ok(stored.row.clone())
    }

    async fn get_group(&self, owner: &str, group_id: i64) -> Result<Option<Group>> {
        let state = self.state.read().await;
        let found = state
            .active_groups()
            .find(|g| g.id == group_id && g.owner == owner)
            .cloned();
        Ok(found)
    }

    async fn list_groups(&self, owner: &str) -> Result<Vec<Group>> {
        let state = self.state.read().await;
        let mut groups: Vec<Group> = state.active_groups().filter(|g| g.owner == owner).cloned().collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn soft_delete_groups(&self, owner: &str, group_ids: &[i64]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut removed = 0;
        for group in state
            .groups
            .iter_mut()
            .filter(|g| !g.is_deleted && g.row.owner == owner && group_ids.contains(&g.row.id))
        {
            group.is_deleted = true;
            removed += 1;
        }
        for assignment in state
            .group_sites
            .iter_mut()
            .filter(|gs| group_ids.contains(&gs.row.group_id))
        {
            assignment.is_deleted = true;
        }
        Ok(removed)
    }

    async fn assign_site(&self, group_id: i64, site_id: i64, area_sq_km: f64) -> Result<(GroupSite, bool)> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .active_group_sites()
            .find(|gs| gs.group_id == group_id && gs.site_id == site_id)
        {
            return Ok((existing.clone(), false));
        }
        let row = GroupSite {
            id: state.next_id(),
            group_id,
            site_id,
            area_sq_km_snapshot: area_sq_km,
            assigned_at: Utc::now(),
        };
        state.group_sites.push(Tombstoned::active(row.clone()));
        Ok((row, true))
    }

    async fn unassign_site(&self, group_id: i64, site_id: i64) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(assignment) = state
            .group_sites
            .iter_mut()
            .find(|gs| !gs.is_deleted && gs.row.group_id == group_id && gs.row.site_id == site_id)
        else {
            return Ok(false);
        };
        assignment.is_deleted = true;
        Ok(true)
    }

    async fn group_sites(&self, group_ids: &[i64]) -> Result<Vec<GroupSite>> {
        let state = self.state.read().await;
        Ok(state
            .active_group_sites()
            .filter(|gs| group_ids.contains(&gs.group_id))
            .cloned()
            .collect())
    }

    async fn site_memberships(&self, site_id: i64) -> Result<Vec<GroupSite>> {
        let state = self.state.read().await;
        Ok(state
            .active_group_sites()
            .filter(|gs| gs.site_id == site_id)
            .cloned()
            .collect())
    }

    async fn notification_owners(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut owners: Vec<String> = state
            .active_groups()
            .filter(|g| g.notification)
            .map(|g| g.owner.clone())
            .collect();
        owners.sort();
        owners.dedup();
        Ok(owners)
    }

    async fn apply_site_delta(&self, update: SiteCounterUpdate) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(site) = state
            .sites
            .iter_mut()
            .find(|s| !s.is_deleted && s.row.id == update.site_id)
        else {
            return Ok(false);
        };
        if site.row.last_notification_scan_at != update.expected_last_scan {
            return Ok(false);
        }
        site.row.new_updates_count += update.delta;
        site.row.last_notification_scan_at = Some(update.scanned_at);
        for group in state
            .groups
            .iter_mut()
            .filter(|g| !g.is_deleted && update.group_ids.contains(&g.row.id))
        {
            group.row.new_updates_count += update.delta;
        }
        Ok(true)
    }

    async fn reset_site_counter(&self, owner: &str, site_id: i64, group_ids: &[i64]) -> Result<Option<i64>> {
        let mut state = self.state.write().await;
        let Some(site) = state
            .sites
            .iter_mut()
            .find(|s| !s.is_deleted && s.row.id == site_id && s.row.owner == owner)
        else {
            return Ok(None);
        };
        let cleared = site.row.new_updates_count;
        site.row.new_updates_count = 0;
        for group in state
            .groups
            .iter_mut()
            .filter(|g| !g.is_deleted && group_ids.contains(&g.row.id))
        {
            group.row.new_updates_count = (group.row.new_updates_count - cleared).max(0);
        }
        Ok(Some(cleared))
    }
}
