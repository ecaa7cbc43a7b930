//! Owner-scoped sites, the group tree over them, and per-site statistics.

pub mod hierarchy;
pub mod model;
pub mod service;
pub mod stats;

pub use hierarchy::{GroupTree, HierarchyNode, SiteRollup};
pub use model::{Group, GroupSite, NewGroup, NewSite, Site, SiteCounterUpdate, SiteFilter, SiteType};
pub use service::{
    BulkRowResult, GroupChanges, GroupInput, GroupRollup, GroupSummary, PointRow, RowStatus, SiteChanges,
    SiteInput, SiteSummary, SitesService,
};
pub use stats::{HeatmapDay, SiteStats};
