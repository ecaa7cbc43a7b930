//! Persistence seams. Soft-deleted rows never leave a store: every read
//! returns active rows only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use satcat_vendors::{CanonicalRecord, Vendor};

use crate::catalog::{
    CaptureFilter, CaptureRecord, DailyVendorCount, PageRequest, PreparedCapture, SpatialFilter,
    UpsertOutcome,
};
use crate::error::Result;
use crate::history::{HistoryFilter, IngestionCursor, NewHistoryEntry};
use crate::sites::model::{Group, GroupSite, NewGroup, NewSite, Site, SiteCounterUpdate, SiteFilter};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Single-row upsert keyed on `(vendor, vendor_id)`. Only mutable columns
    /// change on conflict.
    async fn upsert(&self, capture: PreparedCapture) -> Result<UpsertOutcome>;

    async fn upsert_record(&self, record: CanonicalRecord) -> Result<UpsertOutcome> {
        self.upsert(PreparedCapture::new(record)?).await
    }

    async fn find_capture(&self, vendor: Vendor, vendor_id: &str) -> Result<Option<CaptureRecord>>;

    async fn search(&self, filter: &CaptureFilter, page: PageRequest) -> Result<(Vec<CaptureRecord>, i64)>;

    /// Active captures intersecting `area` acquired in `[t0, t1)`.
    async fn window_count(
        &self,
        area: &SpatialFilter,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> Result<i64>;

    async fn count_intersecting(&self, area: &SpatialFilter) -> Result<i64>;

    async fn oldest_in(&self, area: &SpatialFilter) -> Result<Option<CaptureRecord>>;

    async fn newest_in(&self, area: &SpatialFilter) -> Result<Option<CaptureRecord>>;

    async fn newest_clear_in(&self, area: &SpatialFilter, cloud_max: f64) -> Result<Option<CaptureRecord>>;

    /// Acquisition instants of intersecting captures at or after `since`, ascending.
    async fn acquisition_times(&self, area: &SpatialFilter, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>>;

    /// Latest acquisition of an intersecting capture strictly before `before`.
    async fn latest_acquisition_before(
        &self,
        area: &SpatialFilter,
        before: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn daily_counts(&self, filter: &CaptureFilter) -> Result<Vec<DailyVendorCount>>;

    async fn mark_image_uploaded(&self, vendor: Vendor, vendor_id: &str, image_url: &str) -> Result<bool>;

    async fn set_active(&self, vendor: Vendor, vendor_id: &str, active: bool) -> Result<bool>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Latest incremental row that moved the cursor.
    async fn latest_cursor(&self, vendor: Vendor) -> Result<Option<IngestionCursor>>;

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<IngestionCursor>;

    async fn list_history(
        &self,
        filter: &HistoryFilter,
        page: PageRequest,
    ) -> Result<(Vec<IngestionCursor>, i64)>;
}

#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Fails with `Conflict` when the owner already has an active site of that name.
    async fn insert_site(&self, site: NewSite) -> Result<Site>;

    async fn update_site(&self, site: &Site) -> Result<Site>;

    async fn get_site(&self, owner: &str, site_id: i64) -> Result<Option<Site>>;

    async fn list_sites(&self, owner: &str, filter: &SiteFilter, page: PageRequest) -> Result<(Vec<Site>, i64)>;

    /// Tombstones the site and its group assignments.
    async fn soft_delete_site(&self, owner: &str, site_id: i64) -> Result<bool>;

    async fn insert_group(&self, group: NewGroup) -> Result<Group>;

    async fn update_group(&self, group: &Group) -> Result<Group>;

    async fn get_group(&self, owner: &str, group_id: i64) -> Result<Option<Group>>;

    async fn list_groups(&self, owner: &str) -> Result<Vec<Group>>;

    /// Tombstones the listed groups and their assignments; returns groups removed.
    async fn soft_delete_groups(&self, owner: &str, group_ids: &[i64]) -> Result<u64>;

    /// Returns the active assignment and whether it was created by this call.
    async fn assign_site(&self, group_id: i64, site_id: i64, area_sq_km: f64) -> Result<(GroupSite, bool)>;

    async fn unassign_site(&self, group_id: i64, site_id: i64) -> Result<bool>;

    async fn group_sites(&self, group_ids: &[i64]) -> Result<Vec<GroupSite>>;

    async fn site_memberships(&self, site_id: i64) -> Result<Vec<GroupSite>>;

    /// Owners with at least one active notification-enabled group.
    async fn notification_owners(&self) -> Result<Vec<String>>;

    /// Adds `delta` to the site and the listed groups iff the site's scan
    /// marker still equals `expected_last_scan`. Returns whether it applied.
    async fn apply_site_delta(&self, update: SiteCounterUpdate) -> Result<bool>;

    /// Zeroes the site counter and subtracts the old value from `group_ids`,
    /// clamping at zero. `None` when the site does not exist.
    async fn reset_site_counter(&self, owner: &str, site_id: i64, group_ids: &[i64]) -> Result<Option<i64>>;
}

/// Everything the services need from one backing store.
pub trait Store: CatalogStore + HistoryStore + SiteStore {}

impl<T> Store for T where T: CatalogStore + HistoryStore + SiteStore {}
