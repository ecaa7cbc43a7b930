use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use satcat_core::analytics::{AreaAnalytics, CaptureView};
use satcat_core::catalog::{
    CaptureFilter, DailyVendorCount, PageRequest, Paged, Range, SortKey, SpatialFilter, TimeOfDayFilter,
    DEFAULT_PAGE_SIZE,
};
use satcat_core::geometry::{self, BBox, TimeOfDay};
use satcat_core::history::{HistoryFilter, IngestionCursor, RunMode, WindowOutcome};
use satcat_core::{CatalogError, Vendor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::auth::Owner;
use super::error::ApiResult;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub timezone: Option<String>,
}

impl PageQuery {
    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page.unwrap_or(1), self.page_size.unwrap_or(DEFAULT_PAGE_SIZE))
    }

    fn timezone(&self) -> ApiResult<Tz> {
        match self.timezone.as_deref() {
            Some(name) => Ok(geometry::parse_timezone(name)?),
            None => Ok(Tz::UTC),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GeometryRequest {
    pub geometry: Value,
}

#[derive(Debug, Serialize)]
pub struct WktResponse {
    pub wkt: String,
    pub area_sq_km: f64,
}

pub async fn geojson_to_wkt(_owner: Owner, Json(body): Json<GeometryRequest>) -> ApiResult<Json<WktResponse>> {
    let polygon = geometry::polygon_from_geojson(&body.geometry)?;
    let area_sq_km = geometry::round_to(geometry::geodesic_area_km2(&polygon)?, 4);
    Ok(Json(WktResponse {
        wkt: geometry::wkt_from_polygon(&polygon),
        area_sq_km,
    }))
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PinRequest {
    pub lat: f64,
    pub lon: f64,
    pub distance_km: f64,
}

/// Body of `POST /satellite-catalog`. At most one spatial predicate.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CatalogRequest {
    pub wkt: Option<String>,
    pub bbox: Option<BBox>,
    pub pin: Option<PinRequest>,
    pub vendors: Vec<Vendor>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub cloud_cover: Range,
    pub off_nadir: Range,
    pub gsd: Range,
    pub azimuth_angle: Range,
    pub illumination_azimuth: Range,
    pub illumination_elevation: Range,
    pub time_of_day: Vec<TimeOfDay>,
    pub purchased: Option<bool>,
    pub sort: SortKey,
    pub ascending: bool,
}

impl CatalogRequest {
    fn spatial(&self) -> Result<Option<SpatialFilter>, CatalogError> {
        let given = [self.wkt.is_some(), self.bbox.is_some(), self.pin.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        if given > 1 {
            return Err(CatalogError::InvalidInput(
                "give at most one of wkt, bbox or pin".into(),
            ));
        }
        if let Some(wkt) = &self.wkt {
            return Ok(Some(SpatialFilter::Polygon(geometry::polygon_from_wkt(wkt)?)));
        }
        if let Some(bbox) = self.bbox {
            let checked = BBox::new(bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat)?;
            return Ok(Some(SpatialFilter::BBox(checked)));
        }
        if let Some(pin) = self.pin {
            return Ok(Some(SpatialFilter::pin(pin.lat, pin.lon, pin.distance_km)?));
        }
        Ok(None)
    }

    pub fn into_filter(self, timezone: Tz) -> Result<CaptureFilter, CatalogError> {
        let spatial = self.spatial()?;
        let time_of_day = (!self.time_of_day.is_empty()).then(|| TimeOfDayFilter {
            buckets: self.time_of_day,
            timezone,
        });
        Ok(CaptureFilter {
            spatial,
            vendors: self.vendors,
            acquired_from: self.start_date,
            acquired_to: self.end_date,
            cloud_cover: self.cloud_cover,
            off_nadir: self.off_nadir,
            gsd: self.gsd,
            azimuth_angle: self.azimuth_angle,
            illumination_azimuth: self.illumination_azimuth,
            illumination_elevation: self.illumination_elevation,
            time_of_day,
            purchased: self.purchased,
            sort: self.sort,
            descending: !self.ascending,
        })
    }
}

pub async fn satellite_catalog(
    _owner: Owner,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
    Json(body): Json<CatalogRequest>,
) -> ApiResult<Json<Paged<CaptureView>>> {
    let tz = query.timezone()?;
    let filter = body.into_filter(tz)?;
    Ok(Json(state.analytics.list_captures(&filter, query.page(), tz).await?))
}

pub async fn pin_analytics(
    _owner: Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PinRequest>,
) -> ApiResult<Json<AreaAnalytics>> {
    Ok(Json(
        state
            .analytics
            .pin_analytics(body.lat, body.lon, body.distance_km)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct PolygonRequest {
    pub wkt: String,
}

pub async fn polygon_analytics(
    _owner: Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PolygonRequest>,
) -> ApiResult<Json<AreaAnalytics>> {
    Ok(Json(state.analytics.polygon_analytics(&body.wkt).await?))
}

fn parse_vendors(list: Option<&str>) -> Result<Vec<Vendor>, CatalogError> {
    list.unwrap_or_default()
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.parse::<Vendor>()
                .map_err(|err| CatalogError::InvalidInput(err.to_string()))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub wkt: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Comma-separated vendor names.
    pub vendors: Option<String>,
}

pub async fn calendar(
    _owner: Owner,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
) -> ApiResult<Json<Vec<DailyVendorCount>>> {
    let spatial = query
        .wkt
        .as_deref()
        .map(geometry::polygon_from_wkt)
        .transpose()?
        .map(SpatialFilter::Polygon);
    let filter = CaptureFilter {
        spatial,
        vendors: parse_vendors(query.vendors.as_deref())?,
        acquired_from: query.start,
        acquired_to: query.end,
        ..CaptureFilter::default()
    };
    Ok(Json(state.analytics.calendar(&filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub vendors: Option<String>,
    pub mode: Option<RunMode>,
    pub outcome: Option<WindowOutcome>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

pub async fn history(
    _owner: Owner,
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Paged<IngestionCursor>>> {
    let filter = HistoryFilter {
        vendors: parse_vendors(query.vendors.as_deref())?,
        mode: query.mode,
        outcome: query.outcome,
        since: query.since,
        until: query.until,
    };
    Ok(Json(state.analytics.collection_history(&filter, page.page()).await?))
}
