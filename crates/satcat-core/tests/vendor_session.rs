mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use satcat_core::config::{HttpSettings, VendorSettings};
use satcat_core::vendors::{FetchQuery, PageCursor, VendorAdapter};
use satcat_core::{CatalogError, Vendor};
use serde_json::json;
use tokio::net::TcpListener;

#[derive(Default)]
struct Counters {
    tokens: AtomicUsize,
    searches: AtomicUsize,
}

struct Fake {
    counters: Counters,
    /// Search calls that answer 503 before the vendor recovers.
    unavailable: usize,
    /// Token that the search endpoint refuses with 401.
    stale_token: Option<&'static str>,
}

async fn token(State(fake): State<Arc<Fake>>) -> Json<serde_json::Value> {
    let n = fake.counters.tokens.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "access_token": format!("t{n}"), "expires_in": 3600 }))
}

async fn search(State(fake): State<Arc<Fake>>, headers: HeaderMap) -> Response {
    let n = fake.counters.searches.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !auth.starts_with("Bearer ") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if fake.stale_token.is_some_and(|stale| auth == format!("Bearer {stale}")) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if n < fake.unavailable {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({
        "totalResults": 1,
        "features": [common::airbus_feature("ACQ-42", "2024-06-01T10:00:00Z")]
    }))
    .into_response()
}

async fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, "unsupported geometry").into_response()
}

async fn serve(fake: Arc<Fake>) -> String {
    let router = Router::new()
        .route("/token", post(token))
        .route("/api/v2/opensearch", get(search))
        .route("/api/v2/items/{id}/quicklook", get(bad_request))
        .with_state(fake);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn fast_http() -> HttpSettings {
    HttpSettings {
        timeout_secs: 5,
        max_retries: 3,
        backoff_base_ms: 1,
        backoff_cap_ms: 5,
    }
}

fn airbus(base: &str) -> VendorAdapter {
    let settings = VendorSettings {
        api_key: Some("key".into()),
        api_url: Some(base.to_string()),
        auth_url: Some(format!("{base}/token")),
        ..VendorSettings::default()
    };
    VendorAdapter::from_config(Vendor::Airbus, &settings, &fast_http())
        .unwrap()
        .expect("airbus adapter")
}

fn query() -> FetchQuery {
    FetchQuery::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn retries_unavailable_vendor_with_backoff() {
    let fake = Arc::new(Fake {
        counters: Counters::default(),
        unavailable: 2,
        stale_token: None,
    });
    let base = serve(Arc::clone(&fake)).await;
    let adapter = airbus(&base);

    let page = adapter.fetch_page(&query(), &PageCursor::First).await.unwrap();
    assert_eq!(page.records.len(), 1);
    assert!(page.next.is_none());
    assert_eq!(fake.counters.searches.load(Ordering::SeqCst), 3);
    assert_eq!(fake.counters.tokens.load(Ordering::SeqCst), 1, "token is cached across retries");
}

#[tokio::test]
async fn gives_up_after_retry_cap() {
    let fake = Arc::new(Fake {
        counters: Counters::default(),
        unavailable: usize::MAX,
        stale_token: None,
    });
    let base = serve(Arc::clone(&fake)).await;
    let err = airbus(&base)
        .fetch_page(&query(), &PageCursor::First)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::VendorTransient { vendor: Vendor::Airbus, .. }));
    assert_eq!(fake.counters.searches.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn rejected_token_triggers_one_reauthentication() {
    let fake = Arc::new(Fake {
        counters: Counters::default(),
        unavailable: 0,
        stale_token: Some("t1"),
    });
    let base = serve(Arc::clone(&fake)).await;
    let adapter = airbus(&base);

    let page = adapter.fetch_page(&query(), &PageCursor::First).await.unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(fake.counters.tokens.load(Ordering::SeqCst), 2);

    // The refreshed token stays cached.
    adapter.fetch_page(&query(), &PageCursor::First).await.unwrap();
    assert_eq!(fake.counters.tokens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_errors_are_permanent_rejections() {
    let fake = Arc::new(Fake {
        counters: Counters::default(),
        unavailable: 0,
        stale_token: None,
    });
    let base = serve(fake).await;
    let err = airbus(&base).fetch_thumbnail("ACQ-42").await.unwrap_err();
    assert!(matches!(err, CatalogError::VendorRejected { status: 400, .. }));
}

#[tokio::test]
async fn fetch_by_ids_normalizes_items() {
    let fake = Arc::new(Fake {
        counters: Counters::default(),
        unavailable: 0,
        stale_token: None,
    });
    let base = serve(fake).await;
    let records = airbus(&base).fetch_by_ids(&["ACQ-42".to_string()]).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = records.into_iter().next().unwrap().unwrap();
    assert_eq!(record.vendor_id, "ACQ-42");
    assert_eq!(record.cloud_cover, Some(12.5));
}
