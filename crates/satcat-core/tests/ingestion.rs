mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::utc;
use satcat_core::catalog::PageRequest;
use satcat_core::config::{HttpSettings, VendorSettings};
use satcat_core::history::{HistoryFilter, RunMode, WindowOutcome};
use satcat_core::ingestion::{IngestionOptions, Orchestrator, VendorStatus};
use satcat_core::object_store::ObjectStore;
use satcat_core::realtime::RealtimeBus;
use satcat_core::store::{CatalogStore, HistoryStore, MemoryStore};
use satcat_core::vendors::VendorAdapter;
use satcat_core::Vendor;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Clone, Copy)]
enum Behaviour {
    Empty,
    OneRecord,
    Reject,
    Unavailable,
}

struct Fake {
    behaviour: Behaviour,
    searches: AtomicUsize,
}

async fn airbus_token() -> Json<serde_json::Value> {
    Json(json!({ "access_token": "tok", "expires_in": 3600 }))
}

async fn airbus_search(State(fake): State<Arc<Fake>>) -> Response {
    fake.searches.fetch_add(1, Ordering::SeqCst);
    respond(fake.behaviour, "totalResults", || {
        vec![common::airbus_feature("ACQ-42", "2024-06-01T10:00:00Z")]
    })
}

async fn maxar_search(State(fake): State<Arc<Fake>>, Query(params): Query<HashMap<String, String>>) -> Response {
    fake.searches.fetch_add(1, Ordering::SeqCst);
    assert!(params.contains_key("datetime"));
    respond(fake.behaviour, "numberMatched", Vec::new)
}

async fn quicklook() -> Response {
    (StatusCode::OK, vec![0x89u8, b'P', b'N', b'G']).into_response()
}

fn respond(behaviour: Behaviour, total_key: &str, items: impl Fn() -> Vec<serde_json::Value>) -> Response {
    let page = |features: Vec<serde_json::Value>| {
        let mut body = json!({ "features": [] });
        body[total_key] = json!(features.len());
        body["features"] = json!(features);
        Json(body).into_response()
    };
    match behaviour {
        Behaviour::Empty => page(Vec::new()),
        Behaviour::OneRecord => page(items()),
        Behaviour::Reject => (StatusCode::UNPROCESSABLE_ENTITY, "window too large").into_response(),
        Behaviour::Unavailable => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn serve(behaviour: Behaviour) -> (String, Arc<Fake>) {
    let fake = Arc::new(Fake {
        behaviour,
        searches: AtomicUsize::new(0),
    });
    let router = Router::new()
        .route("/token", post(airbus_token))
        .route("/api/v2/opensearch", get(airbus_search))
        .route("/api/v2/items/{id}/quicklook", get(quicklook))
        .route("/discovery/v1/search", get(maxar_search))
        .with_state(Arc::clone(&fake));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), fake)
}

fn http() -> HttpSettings {
    HttpSettings {
        timeout_secs: 5,
        max_retries: 0,
        backoff_base_ms: 1,
        backoff_cap_ms: 2,
    }
}

fn adapter(vendor: Vendor, base: &str, epoch: chrono::DateTime<chrono::Utc>) -> Arc<VendorAdapter> {
    let settings = VendorSettings {
        api_key: Some("key".into()),
        api_url: Some(base.to_string()),
        auth_url: Some(format!("{base}/token")),
        epoch: Some(epoch),
        ..VendorSettings::default()
    };
    Arc::new(VendorAdapter::from_config(vendor, &settings, &http()).unwrap().unwrap())
}

fn running() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn identical_record_in_second_pass_is_ignored() {
    let (base, _) = serve(Behaviour::OneRecord).await;
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        vec![adapter(Vendor::Airbus, &base, utc(2024, 6, 1, 0))],
        IngestionOptions::default(),
    );

    let first = orchestrator.run_incremental_at(utc(2024, 6, 10, 0), running()).await.unwrap();
    assert_eq!(first.vendors[0].status, VendorStatus::Completed);
    assert_eq!(first.vendors[0].counts.inserted, 1);

    // The vendor keeps returning the record even though it predates the new window.
    let second = orchestrator.run_incremental_at(utc(2024, 6, 11, 0), running()).await.unwrap();
    assert_eq!(second.vendors[0].counts.inserted, 0);
    assert_eq!(second.vendors[0].counts.duplicates, 1);
    assert_eq!(store.capture_count().await, 1);

    let cursor = store.latest_cursor(Vendor::Airbus).await.unwrap().unwrap();
    assert_eq!(cursor.window_end, utc(2024, 6, 11, 0));
}

#[tokio::test]
async fn empty_first_pass_records_one_completed_row() {
    let (base, fake) = serve(Behaviour::Empty).await;
    let store = Arc::new(MemoryStore::new());
    let epoch = utc(2024, 4, 1, 0);
    let now = utc(2024, 6, 10, 0);
    let orchestrator = Orchestrator::new(
        store.clone(),
        vec![adapter(Vendor::Maxar, &base, epoch)],
        IngestionOptions::default(),
    );

    let report = orchestrator.run_incremental_at(now, running()).await.unwrap();
    assert_eq!(report.vendors[0].status, VendorStatus::Completed);
    // Three 28-day windows cover 70 days.
    assert_eq!(fake.searches.load(Ordering::SeqCst), 3);

    let (rows, total) = store
        .list_history(&HistoryFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].outcome, WindowOutcome::Completed);
    assert_eq!(rows[0].window_start, epoch);
    assert_eq!(rows[0].window_end, now);
    assert_eq!(rows[0].counts.records_seen, 0);

    // The next pass resumes from where this one ended.
    let again = orchestrator.run_incremental_at(now, running()).await.unwrap();
    assert_eq!(again.vendors[0].window_start, Some(now));
    assert_eq!(fake.searches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rejected_windows_advance_the_cursor() {
    let (base, _) = serve(Behaviour::Reject).await;
    let store = Arc::new(MemoryStore::new());
    let now = utc(2024, 6, 10, 0);
    let orchestrator = Orchestrator::new(
        store.clone(),
        vec![adapter(Vendor::Maxar, &base, utc(2024, 5, 1, 0))],
        IngestionOptions::default(),
    );

    let report = orchestrator.run_incremental_at(now, running()).await.unwrap();
    assert_eq!(report.vendors[0].status, VendorStatus::Rejected);
    assert!(!report.all_failed());

    let (rows, _) = store
        .list_history(&HistoryFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.outcome == WindowOutcome::Rejected));
    let cursor = store.latest_cursor(Vendor::Maxar).await.unwrap().unwrap();
    assert_eq!(cursor.window_end, now);
}

#[tokio::test]
async fn unavailable_vendor_abandons_without_moving_cursor() {
    let (base, _) = serve(Behaviour::Unavailable).await;
    let store = Arc::new(MemoryStore::new());
    let epoch = utc(2024, 6, 1, 0);
    let orchestrator = Orchestrator::new(
        store.clone(),
        vec![adapter(Vendor::Maxar, &base, epoch)],
        IngestionOptions::default(),
    );

    let report = orchestrator.run_incremental_at(utc(2024, 6, 10, 0), running()).await.unwrap();
    assert_eq!(report.vendors[0].status, VendorStatus::Failed);
    assert!(report.all_failed());
    assert!(store.latest_cursor(Vendor::Maxar).await.unwrap().is_none());

    let (rows, _) = store
        .list_history(&HistoryFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].outcome, WindowOutcome::Abandoned);
    assert_eq!(rows[0].window_start, epoch);
}

#[tokio::test]
async fn cancelled_pass_keeps_cursor() {
    let (base, fake) = serve(Behaviour::Empty).await;
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        vec![adapter(Vendor::Maxar, &base, utc(2024, 1, 1, 0))],
        IngestionOptions::default(),
    );

    let (tx, rx) = watch::channel(true);
    let report = orchestrator.run_incremental_at(utc(2024, 6, 10, 0), rx).await.unwrap();
    drop(tx);
    assert_eq!(report.vendors[0].status, VendorStatus::Failed);
    assert_eq!(fake.searches.load(Ordering::SeqCst), 0);
    assert!(store.latest_cursor(Vendor::Maxar).await.unwrap().is_none());
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let (base, _) = serve(Behaviour::OneRecord).await;
    let store = Arc::new(MemoryStore::new());
    let options = IngestionOptions {
        dry_run: true,
        ..IngestionOptions::default()
    };
    let orchestrator = Orchestrator::new(
        store.clone(),
        vec![adapter(Vendor::Airbus, &base, utc(2024, 6, 1, 0))],
        options,
    );

    let report = orchestrator.run_backfill_at(5, utc(2024, 6, 10, 0), running()).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.vendors[0].counts.records_seen, 1);
    assert_eq!(store.capture_count().await, 0);
    let (_, total) = store
        .list_history(&HistoryFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn backfill_does_not_move_cursor_and_announces_inserts() {
    let (base, _) = serve(Behaviour::OneRecord).await;
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(RealtimeBus::default());
    let mut listener = bus.subscribe("ops-SELF").await;
    let orchestrator = Orchestrator::new(
        store.clone(),
        vec![adapter(Vendor::Airbus, &base, utc(2024, 6, 1, 0))],
        IngestionOptions::default(),
    )
    .with_bus(Arc::clone(&bus));

    let report = orchestrator.run_backfill_at(10, utc(2024, 6, 10, 0), running()).await.unwrap();
    assert_eq!(report.mode, RunMode::Backfill);
    assert_eq!(report.vendors[0].counts.inserted, 1);
    assert!(store.latest_cursor(Vendor::Airbus).await.unwrap().is_none());
    assert!(listener.try_recv().is_some());
}

#[tokio::test]
async fn thumbnails_are_uploaded_and_marked() {
    let (base, _) = serve(Behaviour::OneRecord).await;
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_record(common::record(
            Vendor::Airbus,
            "ACQ-42",
            utc(2024, 6, 1, 10),
            common::square(34.0, -118.0, 0.1),
        ))
        .await
        .unwrap();
    let objects = ObjectStore::memory();
    let orchestrator = Orchestrator::new(
        store.clone(),
        vec![adapter(Vendor::Airbus, &base, utc(2024, 6, 1, 0))],
        IngestionOptions::default(),
    )
    .with_object_store(objects.clone());

    let report = orchestrator
        .run_thumbnails(vec![(Vendor::Airbus, vec!["ACQ-42".into()]), (Vendor::Planet, vec!["x".into()])])
        .await
        .unwrap();
    assert_eq!(report.vendors[0].status, VendorStatus::Completed);
    assert_eq!(report.vendors[1].status, VendorStatus::Failed);

    let stored = objects.get("thumbnails/airbus/ACQ-42.png").await.unwrap();
    assert_eq!(stored.content_type, "image/png");
    let capture = store.find_capture(Vendor::Airbus, "ACQ-42").await.unwrap().unwrap();
    assert!(capture.image_uploaded);
    assert_eq!(capture.image_url.as_deref(), Some("memory://thumbnails/airbus/ACQ-42.png"));
}

