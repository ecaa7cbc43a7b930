mod common;

use std::env;

use anyhow::Result;
use chrono::{Duration, DurationRound, Utc};
use satcat_core::catalog::{SpatialFilter, UpsertOutcome};
use satcat_core::history::{NewHistoryEntry, RunMode, WindowCounts, WindowOutcome};
use satcat_core::sites::{NewGroup, NewSite, SiteCounterUpdate, SiteType};
use satcat_core::store::{CatalogStore, HistoryStore, PgStore, SiteStore};
use satcat_core::Vendor;
use uuid::Uuid;

use common::{record, square};

async fn store() -> Result<Option<PgStore>> {
    let database_url = match env::var("SATCAT_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping postgres store test because SATCAT_TEST_DATABASE_URL is not set");
            return Ok(None);
        }
    };
    let store = PgStore::connect(&database_url, 4).await?;
    store.run_migrations().await?;
    Ok(Some(store))
}

#[tokio::test]
async fn upsert_is_keyed_on_vendor_identity() -> Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let vendor_id = format!("pg-{}", Uuid::new_v4());
    let acquired = Utc::now().duration_trunc(Duration::seconds(1))?;
    let footprint = square(-12.5, 130.8, 0.01);

    let first = record(Vendor::Capella, &vendor_id, acquired, footprint.clone());
    assert_eq!(store.upsert_record(first.clone()).await?, UpsertOutcome::Inserted);
    assert_eq!(store.upsert_record(first.clone()).await?, UpsertOutcome::DuplicateIgnored);

    let mut cloudier = first;
    cloudier.cloud_cover = Some(55.0);
    assert_eq!(store.upsert_record(cloudier).await?, UpsertOutcome::UpdatedInPlace);

    let stored = store
        .find_capture(Vendor::Capella, &vendor_id)
        .await?
        .expect("capture was stored");
    assert_eq!(stored.cloud_cover, Some(55.0));
    assert_eq!(stored.acquisition_datetime, acquired);

    let area = SpatialFilter::Polygon(footprint);
    let inside = store.window_count(&area, acquired, acquired + Duration::seconds(1)).await?;
    let after = store
        .window_count(&area, acquired + Duration::seconds(1), acquired + Duration::seconds(2))
        .await?;
    assert!(inside >= 1);
    assert_eq!(after, 0, "windows are half-open");

    assert!(store.set_active(Vendor::Capella, &vendor_id, false).await?);
    assert!(store.find_capture(Vendor::Capella, &vendor_id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn history_rows_round_trip() -> Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let end = Utc::now().duration_trunc(Duration::seconds(1))?;
    let row = store
        .append_history(NewHistoryEntry {
            vendor: Vendor::SkyFi,
            mode: RunMode::Incremental,
            outcome: WindowOutcome::Completed,
            window_start: end - Duration::days(1),
            window_end: end,
            counts: WindowCounts {
                records_seen: 3,
                inserted: 2,
                duplicates: 1,
                ..WindowCounts::default()
            },
            message: None,
        })
        .await?;
    assert_eq!(row.counts.inserted, 2);

    let latest = store.latest_cursor(Vendor::SkyFi).await?.expect("cursor row");
    assert!(latest.window_end >= end);
    Ok(())
}

#[tokio::test]
async fn site_counters_apply_once_per_scan_marker() -> Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let owner = format!("owner-{}", Uuid::new_v4());
    let group = store
        .insert_group(NewGroup {
            owner: owner.clone(),
            name: "watched".into(),
            parent_id: None,
            description: None,
            notification: true,
        })
        .await?;
    let footprint = square(51.5, -0.12, 0.01);
    let site = store
        .insert_site(NewSite {
            owner: owner.clone(),
            name: "thames".into(),
            footprint,
            centroid_lat: 51.5,
            centroid_lon: -0.12,
            site_type: SiteType::Rectangle,
            area_sq_km: 2.5,
            notification: true,
        })
        .await?;
    let (_, created) = store.assign_site(group.id, site.id, site.area_sq_km).await?;
    assert!(created);
    let (_, created_again) = store.assign_site(group.id, site.id, site.area_sq_km).await?;
    assert!(!created_again);

    let scanned_at = Utc::now().duration_trunc(Duration::seconds(1))?;
    let update = SiteCounterUpdate {
        site_id: site.id,
        expected_last_scan: None,
        scanned_at,
        delta: 3,
        group_ids: vec![group.id],
    };
    assert!(store.apply_site_delta(update.clone()).await?);
    assert!(!store.apply_site_delta(update).await?, "stale marker must not apply");

    let group_after = store.get_group(&owner, group.id).await?.expect("group");
    assert_eq!(group_after.new_updates_count, 3);
    assert_eq!(store.reset_site_counter(&owner, site.id, &[group.id]).await?, Some(3));
    let group_after = store.get_group(&owner, group.id).await?.expect("group");
    assert_eq!(group_after.new_updates_count, 0);

    assert!(store.soft_delete_site(&owner, site.id).await?);
    assert!(store.group_sites(&[group.id]).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn wrapping_polygons_match_both_sides_of_the_antimeridian() -> Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let acquired = Utc::now().duration_trunc(Duration::seconds(1))? - Duration::days(3650);
    for lon in [179.5, -179.5, 0.0] {
        let vendor_id = format!("pg-{}", Uuid::new_v4());
        store
            .upsert_record(record(Vendor::Planet, &vendor_id, acquired, square(0.5, lon, 0.1)))
            .await?;
    }

    let strip = satcat_core::geometry::polygon_from_wkt("POLYGON((179 0,-179 0,-179 1,179 1,179 0))")?;
    let area = SpatialFilter::Polygon(strip);
    let count = store.window_count(&area, acquired, acquired + Duration::seconds(1)).await?;
    assert_eq!(count, 2);
    let latest = store
        .latest_acquisition_before(&area, acquired + Duration::seconds(1))
        .await?;
    assert!(latest.is_some_and(|at| at >= acquired));
    let times = store.acquisition_times(&area, acquired).await?;
    assert!(times.iter().filter(|at| **at == acquired).count() >= 2);
    Ok(())
}
