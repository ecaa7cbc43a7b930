mod auth;
mod catalog;
mod error;
mod sites;
mod ws;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use satcat_core::address::AddressResolver;
use satcat_core::analytics::AnalyticsService;
use satcat_core::notifications::NotificationWatcher;
use satcat_core::realtime::RealtimeBus;
use satcat_core::sites::SitesService;
use satcat_core::store::Store;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub use auth::{Owner, OwnerResolver, TokenIsOwner};
pub use error::{status_for, ApiError, ApiResult};

pub struct AppState {
    pub sites: SitesService,
    pub analytics: AnalyticsService,
    pub watcher: NotificationWatcher,
    pub bus: Arc<RealtimeBus>,
    pub owners: Arc<dyn OwnerResolver>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        address: Arc<dyn AddressResolver>,
        bus: Arc<RealtimeBus>,
        owners: Arc<dyn OwnerResolver>,
    ) -> Self {
        Self {
            sites: SitesService::new(Arc::clone(&store)),
            analytics: AnalyticsService::new(Arc::clone(&store), address),
            watcher: NotificationWatcher::new(store, Arc::clone(&bus)),
            bus,
            owners,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/geojson-to-wkt", post(catalog::geojson_to_wkt))
        .route("/satellite-catalog", post(catalog::satellite_catalog))
        .route("/pin-analytics", post(catalog::pin_analytics))
        .route("/polygon-analytics", post(catalog::polygon_analytics))
        .route("/calendar", get(catalog::calendar))
        .route("/history", get(catalog::history))
        .route(
            "/sites",
            get(sites::list_sites)
                .post(sites::add_site)
                .put(sites::update_site)
                .delete(sites::delete_site),
        )
        .route("/sites/upload", post(sites::upload_sites))
        .route(
            "/groups",
            get(sites::list_groups)
                .post(sites::add_group)
                .put(sites::update_group)
                .delete(sites::delete_group),
        )
        .route("/groups/surface-area", get(sites::surface_area))
        .route("/group-sites", post(sites::assign_site).delete(sites::unassign_site))
        .route("/notifications/scan", get(sites::scan_notifications))
        .route("/notifications/reset", put(sites::reset_notifications))
        .route("/ws/messaging/global", get(ws::messaging))
        .with_state(state)
}

/// Serves the API on `bind` until `shutdown` flips to true.
pub async fn serve(state: Arc<AppState>, bind: &str, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}
