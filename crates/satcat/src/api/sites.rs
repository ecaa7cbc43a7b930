use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use satcat_core::catalog::Paged;
use satcat_core::notifications::SiteScan;
use satcat_core::sites::{
    BulkRowResult, Group, GroupChanges, GroupInput, GroupRollup, GroupSummary, HierarchyNode, PointRow, Site,
    SiteChanges, SiteFilter, SiteInput, SiteSummary, SiteType,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::Owner;
use super::catalog::PageQuery;
use super::error::ApiResult;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct SiteQuery {
    pub name: Option<String>,
    pub site_type: Option<SiteType>,
    pub notification: Option<bool>,
    pub group_id: Option<i64>,
}

pub async fn list_sites(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
    Query(query): Query<SiteQuery>,
) -> ApiResult<Json<Paged<SiteSummary>>> {
    let filter = SiteFilter {
        name_contains: query.name,
        site_type: query.site_type,
        notification: query.notification,
        group_id: query.group_id,
    };
    Ok(Json(state.sites.list_sites_for_owner(&owner, &filter, page.page()).await?))
}

pub async fn add_site(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SiteInput>,
) -> ApiResult<(StatusCode, Json<Site>)> {
    let site = state.sites.add_site(&owner, body).await?;
    Ok((StatusCode::CREATED, Json(site)))
}

#[derive(Debug, Deserialize)]
pub struct SiteUpdate {
    pub site_id: i64,
    #[serde(flatten)]
    pub changes: SiteChanges,
}

pub async fn update_site(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SiteUpdate>,
) -> ApiResult<Json<Site>> {
    Ok(Json(state.sites.update_site(&owner, body.site_id, body.changes).await?))
}

#[derive(Debug, Deserialize)]
pub struct SiteId {
    pub site_id: i64,
}

pub async fn delete_site(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SiteId>,
) -> ApiResult<StatusCode> {
    state.sites.delete_site(&owner, query.site_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub group_id: Option<i64>,
    pub rows: Vec<PointRow>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub created: usize,
    pub failed: usize,
    pub rows: Vec<BulkRowResult>,
}

/// Rows arrive already parsed from the uploaded sheet.
pub async fn upload_sites(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<UploadRequest>,
) -> ApiResult<Json<UploadResponse>> {
    let rows = state
        .sites
        .bulk_add_from_points(&owner, body.rows, body.group_id)
        .await?;
    let created = rows
        .iter()
        .filter(|row| row.site_id.is_some())
        .count();
    Ok(Json(UploadResponse {
        created,
        failed: rows.len() - created,
        rows,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    /// Returns the annotated subtree under this group.
    pub group_id: Option<i64>,
    /// Returns matching groups under their pruned root ancestors.
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum GroupListing {
    Groups(Vec<GroupSummary>),
    Tree(HierarchyNode),
    Roots(Vec<HierarchyNode>),
}

pub async fn list_groups(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Query(query): Query<GroupQuery>,
) -> ApiResult<Json<GroupListing>> {
    let listing = match (query.group_id, query.name) {
        (Some(group_id), _) => GroupListing::Tree(state.sites.full_hierarchy(&owner, group_id).await?),
        (None, Some(name)) => GroupListing::Roots(state.sites.search_hierarchy(&owner, &name).await?),
        (None, None) => GroupListing::Groups(state.sites.list_groups(&owner).await?),
    };
    Ok(Json(listing))
}

pub async fn add_group(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<GroupInput>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let group = state.sites.add_group(&owner, body).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[derive(Debug, Deserialize)]
pub struct GroupUpdate {
    pub group_id: i64,
    #[serde(flatten)]
    pub changes: GroupChanges,
}

pub async fn update_group(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<GroupUpdate>,
) -> ApiResult<Json<Group>> {
    Ok(Json(state.sites.update_group(&owner, body.group_id, body.changes).await?))
}

#[derive(Debug, Deserialize)]
pub struct GroupId {
    pub group_id: i64,
}

pub async fn delete_group(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Query(query): Query<GroupId>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.sites.delete_group(&owner, query.group_id).await?;
    Ok(Json(json!({ "removed_groups": removed })))
}

pub async fn surface_area(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Query(query): Query<GroupId>,
) -> ApiResult<Json<GroupRollup>> {
    Ok(Json(state.sites.surface_area_recursive(&owner, query.group_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct Assignment {
    pub group_id: i64,
    pub site_id: i64,
}

pub async fn assign_site(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<Assignment>,
) -> ApiResult<Response> {
    let (assignment, created) = state
        .sites
        .assign_site(&owner, body.group_id, body.site_id)
        .await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(assignment)).into_response())
}

pub async fn unassign_site(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Query(query): Query<Assignment>,
) -> ApiResult<StatusCode> {
    state
        .sites
        .unassign_site(&owner, query.group_id, query.site_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn scan_notifications(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<SiteScan>>> {
    Ok(Json(state.watcher.scan_notifications(&owner).await?))
}

pub async fn reset_notifications(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SiteId>,
) -> ApiResult<Json<serde_json::Value>> {
    let cleared = state.watcher.reset_site_notifications(&owner, body.site_id).await?;
    Ok(Json(json!({ "site_id": body.site_id, "cleared": cleared })))
}
