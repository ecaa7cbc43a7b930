//! PostgreSQL + PostGIS store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use satcat_vendors::Vendor;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::{CatalogStore, HistoryStore, SiteStore};
use crate::catalog::{
    CaptureFilter, CaptureRecord, DailyVendorCount, PageRequest, PreparedCapture, SortKey,
    SpatialFilter, UpsertOutcome,
};
use crate::db::{self, DbPool};
use crate::error::{CatalogError, Result};
use crate::geometry::{self, TimeOfDay};
use crate::history::{HistoryFilter, IngestionCursor, NewHistoryEntry, RunMode, WindowCounts, WindowOutcome};
use crate::sites::model::{
    Group, GroupSite, NewGroup, NewSite, Site, SiteCounterUpdate, SiteFilter, SiteType,
};

const CAPTURE_COLUMNS: &str = "id, vendor, vendor_id, acquisition_datetime, publication_datetime, \
    holdback_seconds, ST_AsText(footprint) AS footprint_wkt, footprint_digest, centroid_lat, \
    centroid_lon, area_sq_km, cloud_cover, gsd, off_nadir, azimuth_angle, illumination_azimuth, \
    illumination_elevation, sun_elevation, constellation, platform, sensor, metadata, \
    centroid_region, centroid_local, thumbnail_url, image_url, is_active, is_purchased, \
    image_uploaded, created_at";

const HISTORY_COLUMNS: &str = "id, vendor, mode, outcome, window_start, window_end, records_seen, \
    inserted, updated, duplicates, skipped, message, created_at";

const SITE_COLUMNS: &str = "id, owner, name, ST_AsText(footprint) AS footprint_wkt, centroid_lat, \
    centroid_lon, site_type, area_sq_km, notification, new_updates_count, \
    last_notification_scan_at, created_at, updated_at";

const GROUP_COLUMNS: &str =
    "id, owner, name, parent_id, description, notification, new_updates_count, created_at, updated_at";

const GROUP_SITE_COLUMNS: &str = "id, group_id, site_id, area_sq_km_snapshot, assigned_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        Ok(Self::new(db::connect(database_url, max_connections).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        db::run_migrations(&self.pool).await
    }
}

fn vendor_from_row(row: &PgRow) -> Result<Vendor> {
    let raw: String = row.try_get("vendor")?;
    Ok(raw.parse::<Vendor>()?)
}

fn capture_from_row(row: &PgRow) -> Result<CaptureRecord> {
    let wkt: String = row.try_get("footprint_wkt")?;
    Ok(CaptureRecord {
        id: row.try_get("id")?,
        vendor: vendor_from_row(row)?,
        vendor_id: row.try_get("vendor_id")?,
        acquisition_datetime: row.try_get("acquisition_datetime")?,
        publication_datetime: row.try_get("publication_datetime")?,
        holdback_seconds: row.try_get("holdback_seconds")?,
        footprint: geometry::polygon_from_wkt(&wkt)?,
        footprint_digest: row.try_get("footprint_digest")?,
        centroid_lat: row.try_get("centroid_lat")?,
        centroid_lon: row.try_get("centroid_lon")?,
        area_sq_km: row.try_get("area_sq_km")?,
        cloud_cover: row.try_get("cloud_cover")?,
        gsd: row.try_get("gsd")?,
        off_nadir: row.try_get("off_nadir")?,
        azimuth_angle: row.try_get("azimuth_angle")?,
        illumination_azimuth: row.try_get("illumination_azimuth")?,
        illumination_elevation: row.try_get("illumination_elevation")?,
        sun_elevation: row.try_get("sun_elevation")?,
        constellation: row.try_get("constellation")?,
        platform: row.try_get("platform")?,
        sensor: row.try_get("sensor")?,
        metadata: row.try_get("metadata")?,
        centroid_region: row.try_get("centroid_region")?,
        centroid_local: row.try_get("centroid_local")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        image_url: row.try_get("image_url")?,
        is_active: row.try_get("is_active")?,
        is_purchased: row.try_get("is_purchased")?,
        image_uploaded: row.try_get("image_uploaded")?,
        created_at: row.try_get("created_at")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<IngestionCursor> {
    let mode: String = row.try_get("mode")?;
    let outcome: String = row.try_get("outcome")?;
    Ok(IngestionCursor {
        id: row.try_get("id")?,
        vendor: vendor_from_row(row)?,
        mode: RunMode::parse(&mode)?,
        outcome: WindowOutcome::parse(&outcome)?,
        window_start: row.try_get("window_start")?,
        window_end: row.try_get("window_end")?,
        counts: WindowCounts {
            records_seen: row.try_get("records_seen")?,
            inserted: row.try_get("inserted")?,
            updated: row.try_get("updated")?,
            duplicates: row.try_get("duplicates")?,
            skipped: row.try_get("skipped")?,
        },
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn site_from_row(row: &PgRow) -> Result<Site> {
    let wkt: String = row.try_get("footprint_wkt")?;
    let site_type: String = row.try_get("site_type")?;
    Ok(Site {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        name: row.try_get("name")?,
        footprint: geometry::polygon_from_wkt(&wkt)?,
        centroid_lat: row.try_get("centroid_lat")?,
        centroid_lon: row.try_get("centroid_lon")?,
        site_type: site_type.parse::<SiteType>()?,
        area_sq_km: row.try_get("area_sq_km")?,
        notification: row.try_get("notification")?,
        new_updates_count: row.try_get("new_updates_count")?,
        last_notification_scan_at: row.try_get("last_notification_scan_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn group_from_row(row: &PgRow) -> Result<Group> {
    Ok(Group {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        name: row.try_get("name")?,
        parent_id: row.try_get("parent_id")?,
        description: row.try_get("description")?,
        notification: row.try_get("notification")?,
        new_updates_count: row.try_get("new_updates_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn group_site_from_row(row: &PgRow) -> Result<GroupSite> {
    Ok(GroupSite {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        site_id: row.try_get("site_id")?,
        area_sq_km_snapshot: row.try_get("area_sq_km_snapshot")?,
        assigned_at: row.try_get("assigned_at")?,
    })
}

fn conflict_or_storage(err: sqlx::Error, what: impl FnOnce() -> String) -> CatalogError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return CatalogError::Conflict(what());
        }
    }
    CatalogError::Storage(err)
}

fn push_spatial(qb: &mut QueryBuilder<'static, Postgres>, area: &SpatialFilter) {
    match area {
        SpatialFilter::Polygon(polygon) => {
            qb.push("(");
            for (position, part) in geometry::split_antimeridian(polygon).iter().enumerate() {
                if position > 0 {
                    qb.push(" OR ");
                }
                qb.push("ST_Intersects(footprint, ST_GeomFromText(")
                    .push_bind(geometry::wkt_from_polygon(part))
                    .push(", 4326))");
            }
            qb.push(")");
        }
        SpatialFilter::BBox(bbox) => {
            qb.push("(");
            for (position, rect) in bbox.rects().into_iter().enumerate() {
                if position > 0 {
                    qb.push(" OR ");
                }
                qb.push("ST_Intersects(footprint, ST_MakeEnvelope(")
                    .push_bind(rect.min().x)
                    .push(", ")
                    .push_bind(rect.min().y)
                    .push(", ")
                    .push_bind(rect.max().x)
                    .push(", ")
                    .push_bind(rect.max().y)
                    .push(", 4326))");
            }
            qb.push(")");
        }
        SpatialFilter::Pin { lat, lon, radius_km } => {
            qb.push("ST_DWithin(footprint::geography, ST_SetSRID(ST_MakePoint(")
                .push_bind(*lon)
                .push(", ")
                .push_bind(*lat)
                .push("), 4326)::geography, ")
                .push_bind(radius_km * 1_000.0)
                .push(")");
        }
    }
}

fn push_capture_filters(qb: &mut QueryBuilder<'static, Postgres>, filter: &CaptureFilter) {
    qb.push(" WHERE is_active");
    if let Some(area) = &filter.spatial {
        qb.push(" AND ");
        push_spatial(qb, area);
    }
    if !filter.vendors.is_empty() {
        let vendors: Vec<String> = filter.vendors.iter().map(|v| v.as_str().to_string()).collect();
        qb.push(" AND vendor = ANY(").push_bind(vendors).push(")");
    }
    if let Some(from) = filter.acquired_from {
        qb.push(" AND acquisition_datetime >= ").push_bind(from);
    }
    if let Some(to) = filter.acquired_to {
        qb.push(" AND acquisition_datetime <= ").push_bind(to);
    }
    for (column, range) in [
        ("cloud_cover", filter.cloud_cover),
        ("off_nadir", filter.off_nadir),
        ("gsd", filter.gsd),
        ("azimuth_angle", filter.azimuth_angle),
        ("illumination_azimuth", filter.illumination_azimuth),
        ("illumination_elevation", filter.illumination_elevation),
    ] {
        if let Some(min) = range.min {
            qb.push(format!(" AND {column} >= ")).push_bind(min);
        }
        if let Some(max) = range.max {
            qb.push(format!(" AND {column} <= ")).push_bind(max);
        }
    }
    if let Some(tod) = &filter.time_of_day {
        if !tod.buckets.is_empty() {
            let hours: Vec<i32> = (0..24u32)
                .filter(|hour| tod.buckets.contains(&TimeOfDay::from_hour(*hour)))
                .map(|hour| hour as i32)
                .collect();
            qb.push(" AND EXTRACT(HOUR FROM acquisition_datetime AT TIME ZONE ")
                .push_bind(tod.timezone.name().to_string())
                .push(")::int = ANY(")
                .push_bind(hours)
                .push(")");
        }
    }
    if let Some(purchased) = filter.purchased {
        qb.push(" AND is_purchased = ").push_bind(purchased);
    }
}

fn order_clause(sort: SortKey, descending: bool) -> String {
    let column = match sort {
        SortKey::AcquisitionDatetime => "acquisition_datetime",
        SortKey::Vendor => "vendor",
        SortKey::Sensor => "sensor",
    };
    let direction = if descending { "DESC" } else { "ASC" };
    format!(" ORDER BY {column} {direction}, vendor ASC, vendor_id ASC")
}

fn spatial_capture_query(area: &SpatialFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {CAPTURE_COLUMNS} FROM captures WHERE is_active AND "
    ));
    push_spatial(&mut qb, area);
    qb
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn upsert(&self, capture: PreparedCapture) -> Result<UpsertOutcome> {
        let record = &capture.record;

        let reissued: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM captures
            WHERE vendor = $1
              AND footprint_digest = $2
              AND acquisition_datetime = $3
              AND vendor_id <> $4
              AND NOT EXISTS (SELECT 1 FROM captures WHERE vendor = $1 AND vendor_id = $4)
            LIMIT 1
            "#,
        )
        .bind(record.vendor.as_str())
        .bind(&capture.footprint_digest)
        .bind(record.acquisition_datetime)
        .bind(&record.vendor_id)
        .fetch_optional(&self.pool)
        .await?;
        if reissued.is_some() {
            return Ok(UpsertOutcome::DuplicateIgnored);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO captures (
                vendor, vendor_id, acquisition_datetime, publication_datetime, holdback_seconds,
                footprint, footprint_digest, centroid_lat, centroid_lon, area_sq_km,
                cloud_cover, gsd, off_nadir, azimuth_angle, illumination_azimuth,
                illumination_elevation, sun_elevation, constellation, platform, sensor,
                metadata, centroid_region, centroid_local, thumbnail_url
            ) VALUES (
                $1, $2, $3, $4, $5,
                ST_GeomFromText($6, 4326), $7, $8, $9, $10,
                $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20,
                $21, $22, $23, $24
            )
            ON CONFLICT (vendor, vendor_id) DO UPDATE SET
                metadata = EXCLUDED.metadata,
                is_active = TRUE,
                centroid_region = COALESCE(EXCLUDED.centroid_region, captures.centroid_region),
                centroid_local = COALESCE(EXCLUDED.centroid_local, captures.centroid_local),
                thumbnail_url = COALESCE(EXCLUDED.thumbnail_url, captures.thumbnail_url),
                updated_at = now()
            WHERE captures.metadata IS DISTINCT FROM EXCLUDED.metadata
               OR NOT captures.is_active
               OR captures.centroid_region IS DISTINCT FROM COALESCE(EXCLUDED.centroid_region, captures.centroid_region)
               OR captures.centroid_local IS DISTINCT FROM COALESCE(EXCLUDED.centroid_local, captures.centroid_local)
               OR captures.thumbnail_url IS DISTINCT FROM COALESCE(EXCLUDED.thumbnail_url, captures.thumbnail_url)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(record.vendor.as_str())
        .bind(&record.vendor_id)
        .bind(record.acquisition_datetime)
        .bind(record.publication_datetime)
        .bind(capture.holdback_seconds())
        .bind(geometry::wkt_from_polygon(&record.footprint))
        .bind(&capture.footprint_digest)
        .bind(capture.centroid_lat)
        .bind(capture.centroid_lon)
        .bind(capture.area_sq_km)
        .bind(record.cloud_cover)
        .bind(record.gsd)
        .bind(record.off_nadir)
        .bind(record.azimuth_angle)
        .bind(record.illumination_azimuth)
        .bind(record.illumination_elevation)
        .bind(record.sun_elevation)
        .bind(&record.constellation)
        .bind(&record.platform)
        .bind(&record.sensor)
        .bind(&record.metadata)
        .bind(&capture.centroid_region)
        .bind(&capture.centroid_local)
        .bind(&record.thumbnail_url)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(UpsertOutcome::DuplicateIgnored),
            Some(row) => {
                let inserted: bool = row.try_get("inserted")?;
                Ok(if inserted {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::UpdatedInPlace
                })
            }
        }
    }

    async fn find_capture(&self, vendor: Vendor, vendor_id: &str) -> Result<Option<CaptureRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CAPTURE_COLUMNS} FROM captures WHERE vendor = $1 AND vendor_id = $2"
        ))
        .bind(vendor.as_str())
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(capture_from_row).transpose()
    }

    async fn search(&self, filter: &CaptureFilter, page: PageRequest) -> Result<(Vec<CaptureRecord>, i64)> {
        filter.validate()?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) AS total FROM captures");
        push_capture_filters(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut query = QueryBuilder::new(format!("SELECT {CAPTURE_COLUMNS} FROM captures"));
        push_capture_filters(&mut query, filter);
        query.push(order_clause(filter.sort, filter.descending));
        query
            .push(" LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = query.build().fetch_all(&self.pool).await?;
        let captures = rows.iter().map(capture_from_row).collect::<Result<Vec<_>>>()?;
        Ok((captures, total))
    }

    async fn window_count(
        &self,
        area: &SpatialFilter,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) AS total FROM captures WHERE is_active AND ");
        push_spatial(&mut qb, area);
        qb.push(" AND acquisition_datetime >= ")
            .push_bind(t0)
            .push(" AND acquisition_datetime < ")
            .push_bind(t1);
        Ok(qb.build().fetch_one(&self.pool).await?.try_get("total")?)
    }

    async fn count_intersecting(&self, area: &SpatialFilter) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) AS total FROM captures WHERE is_active AND ");
        push_spatial(&mut qb, area);
        Ok(qb.build().fetch_one(&self.pool).await?.try_get("total")?)
    }

    async fn oldest_in(&self, area: &SpatialFilter) -> Result<Option<CaptureRecord>> {
        let mut qb = spatial_capture_query(area);
        qb.push(order_clause(SortKey::AcquisitionDatetime, false)).push(" LIMIT 1");
        let row = qb.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(capture_from_row).transpose()
    }

    async fn newest_in(&self, area: &SpatialFilter) -> Result<Option<CaptureRecord>> {
        let mut qb = spatial_capture_query(area);
        qb.push(order_clause(SortKey::AcquisitionDatetime, true)).push(" LIMIT 1");
        let row = qb.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(capture_from_row).transpose()
    }

    async fn newest_clear_in(&self, area: &SpatialFilter, cloud_max: f64) -> Result<Option<CaptureRecord>> {
        let mut qb = spatial_capture_query(area);
        qb.push(" AND cloud_cover IS NOT NULL AND cloud_cover <= ").push_bind(cloud_max);
        qb.push(order_clause(SortKey::AcquisitionDatetime, true)).push(" LIMIT 1");
        let row = qb.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(capture_from_row).transpose()
    }

    async fn latest_acquisition_before(
        &self,
        area: &SpatialFilter,
        before: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut qb = QueryBuilder::new("SELECT MAX(acquisition_datetime) AS latest FROM captures WHERE is_active AND ");
        push_spatial(&mut qb, area);
        qb.push(" AND acquisition_datetime < ").push_bind(before);
        Ok(qb.build().fetch_one(&self.pool).await?.try_get("latest")?)
    }

    async fn acquisition_times(&self, area: &SpatialFilter, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let mut qb = QueryBuilder::new("SELECT acquisition_datetime FROM captures WHERE is_active AND ");
        push_spatial(&mut qb, area);
        qb.push(" AND acquisition_datetime >= ").push_bind(since);
        qb.push(" ORDER BY acquisition_datetime ASC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get("acquisition_datetime").map_err(CatalogError::from))
            .collect()
    }

    async fn daily_counts(&self, filter: &CaptureFilter) -> Result<Vec<DailyVendorCount>> {
        filter.validate()?;
        let mut qb = QueryBuilder::new(
            "SELECT (acquisition_datetime AT TIME ZONE 'UTC')::date AS day, vendor, COUNT(*) AS total FROM captures",
        );
        push_capture_filters(&mut qb, filter);
        qb.push(" GROUP BY day, vendor ORDER BY day ASC, vendor ASC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let date: NaiveDate = row.try_get("day")?;
                Ok(DailyVendorCount {
                    date,
                    vendor: vendor_from_row(row)?,
                    count: row.try_get("total")?,
                })
            })
            .collect()
    }

    async fn mark_image_uploaded(&self, vendor: Vendor, vendor_id: &str, image_url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE captures
            SET image_uploaded = TRUE, image_url = $3, updated_at = now()
            WHERE vendor = $1 AND vendor_id = $2
            "#,
        )
        .bind(vendor.as_str())
        .bind(vendor_id)
        .bind(image_url)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_active(&self, vendor: Vendor, vendor_id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE captures SET is_active = $3, updated_at = now() WHERE vendor = $1 AND vendor_id = $2",
        )
        .bind(vendor.as_str())
        .bind(vendor_id)
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn push_history_filters(qb: &mut QueryBuilder<'static, Postgres>, filter: &HistoryFilter) {
    qb.push(" WHERE TRUE");
    if !filter.vendors.is_empty() {
        let vendors: Vec<String> = filter.vendors.iter().map(|v| v.as_str().to_string()).collect();
        qb.push(" AND vendor = ANY(").push_bind(vendors).push(")");
    }
    if let Some(mode) = filter.mode {
        qb.push(" AND mode = ").push_bind(mode.as_str());
    }
    if let Some(outcome) = filter.outcome {
        qb.push(" AND outcome = ").push_bind(outcome.as_str());
    }
    if let Some(since) = filter.since {
        qb.push(" AND window_end >= ").push_bind(since);
    }
    if let Some(until) = filter.until {
        qb.push(" AND window_start <= ").push_bind(until);
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn latest_cursor(&self, vendor: Vendor) -> Result<Option<IngestionCursor>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {HISTORY_COLUMNS}
            FROM ingestion_history
            WHERE vendor = $1
              AND mode = 'incremental'
              AND outcome IN ('completed', 'rejected')
            ORDER BY window_end DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(vendor.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(history_from_row).transpose()
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<IngestionCursor> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO ingestion_history (
                vendor, mode, outcome, window_start, window_end,
                records_seen, inserted, updated, duplicates, skipped, message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {HISTORY_COLUMNS}
            "#
        ))
        .bind(entry.vendor.as_str())
        .bind(entry.mode.as_str())
        .bind(entry.outcome.as_str())
        .bind(entry.window_start)
        .bind(entry.window_end)
        .bind(entry.counts.records_seen)
        .bind(entry.counts.inserted)
        .bind(entry.counts.updated)
        .bind(entry.counts.duplicates)
        .bind(entry.counts.skipped)
        .bind(&entry.message)
        .fetch_one(&self.pool)
        .await?;
        history_from_row(&row)
    }

    async fn list_history(
        &self,
        filter: &HistoryFilter,
        page: PageRequest,
    ) -> Result<(Vec<IngestionCursor>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) AS total FROM ingestion_history");
        push_history_filters(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut query = QueryBuilder::new(format!("SELECT {HISTORY_COLUMNS} FROM ingestion_history"));
        push_history_filters(&mut query, filter);
        query
            .push(" ORDER BY window_end DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = query.build().fetch_all(&self.pool).await?;
        let history = rows.iter().map(history_from_row).collect::<Result<Vec<_>>>()?;
        Ok((history, total))
    }
}

fn push_site_filters(qb: &mut QueryBuilder<'static, Postgres>, owner: &str, filter: &SiteFilter) {
    qb.push(" WHERE NOT is_deleted AND owner = ").push_bind(owner.to_string());
    if let Some(needle) = &filter.name_contains {
        qb.push(" AND strpos(lower(name), lower(")
            .push_bind(needle.clone())
            .push(")) > 0");
    }
    if let Some(site_type) = filter.site_type {
        qb.push(" AND site_type = ").push_bind(site_type.as_str());
    }
    if let Some(notification) = filter.notification {
        qb.push(" AND notification = ").push_bind(notification);
    }
    if let Some(group_id) = filter.group_id {
        qb.push(" AND id IN (SELECT site_id FROM group_sites WHERE NOT is_deleted AND group_id = ")
            .push_bind(group_id)
            .push(")");
    }
}

#[async_trait]
impl SiteStore for PgStore {
    async fn insert_site(&self, site: NewSite) -> Result<Site> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sites (
                owner, name, footprint, centroid_lat, centroid_lon, site_type, area_sq_km, notification
            ) VALUES ($1, $2, ST_GeomFromText($3, 4326), $4, $5, $6, $7, $8)
            RETURNING {SITE_COLUMNS}
            "#
        ))
        .bind(&site.owner)
        .bind(&site.name)
        .bind(geometry::wkt_from_polygon(&site.footprint))
        .bind(site.centroid_lat)
        .bind(site.centroid_lon)
        .bind(site.site_type.as_str())
        .bind(site.area_sq_km)
        .bind(site.notification)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| conflict_or_storage(err, || format!("site '{}' already exists", site.name)))?;
        site_from_row(&row)
    }

    async fn update_site(&self, site: &Site) -> Result<Site> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE sites
            SET name = $3,
                footprint = ST_GeomFromText($4, 4326),
                centroid_lat = $5,
                centroid_lon = $6,
                site_type = $7,
                area_sq_km = $8,
                notification = $9,
                updated_at = now()
            WHERE id = $1 AND owner = $2 AND NOT is_deleted
            RETURNING {SITE_COLUMNS}
            "#
        ))
        .bind(site.id)
        .bind(&site.owner)
        .bind(&site.name)
        .bind(geometry::wkt_from_polygon(&site.footprint))
        .bind(site.centroid_lat)
        .bind(site.centroid_lon)
        .bind(site.site_type.as_str())
        .bind(site.area_sq_km)
        .bind(site.notification)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| conflict_or_storage(err, || format!("site '{}' already exists", site.name)))?;
        let row = row.ok_or_else(|| CatalogError::NotFound(format!("site {}", site.id)))?;
        site_from_row(&row)
    }

    async fn get_site(&self, owner: &str, site_id: i64) -> Result<Option<Site>> {
        let row = sqlx::query(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE id = $1 AND owner = $2 AND NOT is_deleted"
        ))
        .bind(site_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(site_from_row).transpose()
    }

    async fn list_sites(&self, owner: &str, filter: &SiteFilter, page: PageRequest) -> Result<(Vec<Site>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) AS total FROM sites");
        push_site_filters(&mut count, owner, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut query = QueryBuilder::new(format!("SELECT {SITE_COLUMNS} FROM sites"));
        push_site_filters(&mut query, owner, filter);
        query
            .push(" ORDER BY name ASC, id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = query.build().fetch_all(&self.pool).await?;
        let sites = rows.iter().map(site_from_row).collect::<Result<Vec<_>>>()?;
        Ok((sites, total))
    }

    async fn soft_delete_site(&self, owner: &str, site_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(
            "UPDATE sites SET is_deleted = TRUE, updated_at = now() WHERE id = $1 AND owner = $2 AND NOT is_deleted",
        )
        .bind(site_id)
        .bind(owner)
        .execute(&mut *tx)
        .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("UPDATE group_sites SET is_deleted = TRUE WHERE site_id = $1 AND NOT is_deleted")
            .bind(site_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn insert_group(&self, group: NewGroup) -> Result<Group> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO groups (owner, name, parent_id, description, notification)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(&group.owner)
        .bind(&group.name)
        .bind(group.parent_id)
        .bind(&group.description)
        .bind(group.notification)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| conflict_or_storage(err, || format!("group '{}' already exists", group.name)))?;
        group_from_row(&row)
    }

    async fn update_group(&self, group: &Group) -> Result<Group> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE groups
            SET name = $3, parent_id = $4, description = $5, notification = $6, updated_at = now()
            WHERE id = $1 AND owner = $2 AND NOT is_deleted
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group.id)
        .bind(&group.owner)
        .bind(&group.name)
        .bind(group.parent_id)
        .bind(&group.description)
        .bind(group.notification)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| conflict_or_storage(err, || format!("group '{}' already exists", group.name)))?;
        let row = row.ok_or_else(|| CatalogError::NotFound(format!("group {}", group.id)))?;
        group_from_row(&row)
    }

    async fn get_group(&self, owner: &str, group_id: i64) -> Result<Option<Group>> {
        let row = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1 AND owner = $2 AND NOT is_deleted"
        ))
        .bind(group_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn list_groups(&self, owner: &str) -> Result<Vec<Group>> {
        let rows = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE owner = $1 AND NOT is_deleted ORDER BY id"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn soft_delete_groups(&self, owner: &str, group_ids: &[i64]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(
            r#"
            UPDATE groups SET is_deleted = TRUE, updated_at = now()
            WHERE owner = $1 AND id = ANY($2) AND NOT is_deleted
            "#,
        )
        .bind(owner)
        .bind(group_ids)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE group_sites SET is_deleted = TRUE WHERE group_id = ANY($1) AND NOT is_deleted")
            .bind(group_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected())
    }

    async fn assign_site(&self, group_id: i64, site_id: i64, area_sq_km: f64) -> Result<(GroupSite, bool)> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO group_sites (group_id, site_id, area_sq_km_snapshot)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, site_id) WHERE NOT is_deleted DO NOTHING
            RETURNING {GROUP_SITE_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(site_id)
        .bind(area_sq_km)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok((group_site_from_row(&row)?, true));
        }

        let row = sqlx::query(&format!(
            r#"
            SELECT {GROUP_SITE_COLUMNS} FROM group_sites
            WHERE group_id = $1 AND site_id = $2 AND NOT is_deleted
            "#
        ))
        .bind(group_id)
        .bind(site_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((group_site_from_row(&row)?, false))
    }

    async fn unassign_site(&self, group_id: i64, site_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE group_sites SET is_deleted = TRUE WHERE group_id = $1 AND site_id = $2 AND NOT is_deleted",
        )
        .bind(group_id)
        .bind(site_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn group_sites(&self, group_ids: &[i64]) -> Result<Vec<GroupSite>> {
        let rows = sqlx::query(&format!(
            "SELECT {GROUP_SITE_COLUMNS} FROM group_sites WHERE group_id = ANY($1) AND NOT is_deleted ORDER BY id"
        ))
        .bind(group_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_site_from_row).collect()
    }

    async fn site_memberships(&self, site_id: i64) -> Result<Vec<GroupSite>> {
        let rows = sqlx::query(&format!(
            "SELECT {GROUP_SITE_COLUMNS} FROM group_sites WHERE site_id = $1 AND NOT is_deleted ORDER BY id"
        ))
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_site_from_row).collect()
    }

    async fn notification_owners(&self) -> Result<Vec<String>> {
        let owners: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT owner FROM groups WHERE notification AND NOT is_deleted ORDER BY owner",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(owners)
    }

    async fn apply_site_delta(&self, update: SiteCounterUpdate) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let applied = sqlx::query(
            r#"
            UPDATE sites
            SET new_updates_count = new_updates_count + $2,
                last_notification_scan_at = $3,
                updated_at = now()
            WHERE id = $1
              AND NOT is_deleted
              AND last_notification_scan_at IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(update.site_id)
        .bind(update.delta)
        .bind(update.scanned_at)
        .bind(update.expected_last_scan)
        .execute(&mut *tx)
        .await?;
        if applied.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(
            r#"
            UPDATE groups
            SET new_updates_count = new_updates_count + $1, updated_at = now()
            WHERE id = ANY($2) AND NOT is_deleted
            "#,
        )
        .bind(update.delta)
        .bind(&update.group_ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn reset_site_counter(&self, owner: &str, site_id: i64, group_ids: &[i64]) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;
        let cleared: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT new_updates_count FROM sites
            WHERE id = $1 AND owner = $2 AND NOT is_deleted
            FOR UPDATE
            "#,
        )
        .bind(site_id)
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(cleared) = cleared else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE sites SET new_updates_count = 0, updated_at = now() WHERE id = $1")
            .bind(site_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            UPDATE groups
            SET new_updates_count = GREATEST(new_updates_count - $1, 0), updated_at = now()
            WHERE id = ANY($2) AND NOT is_deleted
            "#,
        )
        .bind(cleared)
        .bind(group_ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(cleared))
    }
}
