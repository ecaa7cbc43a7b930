use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use satcat::api::{self, status_for, AppState, TokenIsOwner};
use satcat_core::address::NoAddress;
use satcat_core::realtime::RealtimeBus;
use satcat_core::store::MemoryStore;
use satcat_core::CatalogError;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(NoAddress),
        Arc::new(RealtimeBus::default()),
        Arc::new(TokenIsOwner),
    );
    api::router(Arc::new(state))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", "Bearer owner-1");
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn square_site(name: &str) -> Value {
    json!({
        "name": name,
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[-118.1, 33.9], [-117.9, 33.9], [-117.9, 34.1], [-118.1, 34.1], [-118.1, 33.9]]]
        }
    })
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let response = app()
        .oneshot(Request::builder().uri("/sites").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_can_come_from_the_query_string() {
    let response = app()
        .oneshot(Request::builder().uri("/groups?token=owner-9").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn geojson_converts_to_wkt_with_area() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/geojson-to-wkt",
        Some(json!({ "geometry": square_site("x")["geometry"].clone() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["wkt"].as_str().unwrap().starts_with("POLYGON"));
    assert!(body["area_sq_km"].as_f64().unwrap() > 300.0);

    let (status, body) = call(
        &app,
        "POST",
        "/geojson-to-wkt",
        Some(json!({ "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn sites_are_scoped_and_names_are_unique() {
    let app = app();
    let (status, site) = call(&app, "POST", "/sites", Some(square_site("yard"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(site["site_type"], "rectangle");

    let (status, body) = call(&app, "POST", "/sites", Some(square_site("yard"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let (status, page) = call(&app, "GET", "/sites?page=1&page_size=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["name"], "yard");
    assert_eq!(page["items"][0]["stats"]["acquisition_count"], 0);

    let (status, renamed) = call(
        &app,
        "PUT",
        "/sites",
        Some(json!({ "site_id": site["id"], "name": "depot" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["name"], "depot");

    let uri = format!("/sites?site_id={}", site["id"]);
    let (status, _) = call(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn groups_reject_cycles_and_assignments_are_idempotent() {
    let app = app();
    let (_, parent) = call(&app, "POST", "/groups", Some(json!({ "name": "parent" }))).await;
    let (status, child) = call(
        &app,
        "POST",
        "/groups",
        Some(json!({ "name": "child", "parent_id": parent["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &app,
        "PUT",
        "/groups",
        Some(json!({ "group_id": parent["id"], "parent_id": child["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, site) = call(&app, "POST", "/sites", Some(square_site("yard"))).await;
    let assignment = json!({ "group_id": child["id"], "site_id": site["id"] });
    let (status, _) = call(&app, "POST", "/group-sites", Some(assignment.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(&app, "POST", "/group-sites", Some(assignment)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, groups) = call(&app, "GET", "/groups", None).await;
    assert_eq!(status, StatusCode::OK);
    let child_summary = groups
        .as_array()
        .unwrap()
        .iter()
        .find(|g| g["id"] == child["id"])
        .unwrap();
    assert_eq!(child_summary["site_count"], 1);

    let (status, tree) = call(&app, "GET", &format!("/groups?group_id={}", parent["id"]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tree["children"][0]["group"]["id"], child["id"]);

    let (status, _) = call(&app, "DELETE", "/groups?group_id=4040", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, removed) = call(&app, "DELETE", &format!("/groups?group_id={}", parent["id"]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["removed_groups"], 2);
}

#[tokio::test]
async fn catalog_search_accepts_one_spatial_filter() {
    let app = app();
    let (status, _) = call(
        &app,
        "POST",
        "/satellite-catalog",
        Some(json!({
            "bbox": { "min_lon": -1.0, "min_lat": -1.0, "max_lon": 1.0, "max_lat": 1.0 },
            "pin": { "lat": 0.0, "lon": 0.0, "distance_km": 5.0 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, page) = call(
        &app,
        "POST",
        "/satellite-catalog?page=2&page_size=1000&timezone=America/Los_Angeles",
        Some(json!({ "pin": { "lat": 0.0, "lon": 0.0, "distance_km": 5.0 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["page"], 2);
    assert_eq!(page["page_size"], 500);
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn bulk_upload_reports_each_row() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/sites/upload",
        Some(json!({
            "rows": [
                { "lat": 34.0, "lon": -118.0, "name": "a" },
                { "lat": 134.0, "lon": -118.0, "name": "b" }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["rows"][1]["status"], "failed");
}

#[tokio::test]
async fn notification_reset_for_unknown_site_is_not_found() {
    let app = app();
    let (status, scans) = call(&app, "GET", "/notifications/scan", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scans, json!([]));

    let (status, _) = call(&app, "PUT", "/notifications/reset", Some(json!({ "site_id": 77 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
fn storage_errors_map_to_service_unavailable() {
    assert_eq!(
        status_for(&CatalogError::Storage(sqlx::Error::PoolTimedOut)),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(status_for(&CatalogError::Cancelled), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        status_for(&CatalogError::InvalidGeometry("ring".into())),
        StatusCode::BAD_REQUEST
    );
}
