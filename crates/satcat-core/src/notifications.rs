//! Periodic diff of new captures against notification-enabled sites.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::SpatialFilter;
use crate::error::{CatalogError, Result};
use crate::realtime::{self_channel, RealtimeBus, RealtimeEvent, SiteUpdateMessage};
use crate::sites::hierarchy::GroupTree;
use crate::sites::model::SiteCounterUpdate;
use crate::store::Store;

/// One site whose counter moved during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteScan {
    pub site_id: i64,
    pub site_name: String,
    pub new_updates: i64,
    pub time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationWatcher {
    store: Arc<dyn Store>,
    bus: Arc<RealtimeBus>,
}

impl NotificationWatcher {
    pub fn new(store: Arc<dyn Store>, bus: Arc<RealtimeBus>) -> Self {
        Self { store, bus }
    }

    pub fn bus(&self) -> &Arc<RealtimeBus> {
        &self.bus
    }

    pub async fn scan_notifications(&self, owner: &str) -> Result<Vec<SiteScan>> {
        self.scan_notifications_at(owner, Utc::now()).await
    }

    /// Counts captures acquired since each watched site's last scan, bumps
    /// the site and group counters, and publishes one event per changed site.
    pub async fn scan_notifications_at(&self, owner: &str, now: DateTime<Utc>) -> Result<Vec<SiteScan>> {
        let tree = GroupTree::new(self.store.list_groups(owner).await?);
        let watched: Vec<i64> = tree.groups().filter(|g| g.notification).map(|g| g.id).collect();
        if watched.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut site_ids: Vec<i64> = self
            .store
            .group_sites(&watched)
            .await?
            .into_iter()
            .map(|gs| gs.site_id)
            .filter(|id| seen.insert(*id))
            .collect();
        site_ids.sort_unstable();

        let channel = self_channel(owner);
        let mut scans = Vec::new();
        for site_id in site_ids {
            let Some(site) = self.store.get_site(owner, site_id).await? else {
                continue;
            };
            let t0 = site.last_notification_scan_at.unwrap_or(site.created_at);
            if t0 >= now {
                continue;
            }
            let delta = self
                .store
                .window_count(&SpatialFilter::Polygon(site.footprint.clone()), t0, now)
                .await?;
            if delta == 0 {
                continue;
            }

            let memberships = self.store.site_memberships(site_id).await?;
            let group_ids = tree.with_ancestors(memberships.iter().map(|gs| gs.group_id));
            let applied = self
                .store
                .apply_site_delta(SiteCounterUpdate {
                    site_id,
                    expected_last_scan: site.last_notification_scan_at,
                    scanned_at: now,
                    delta,
                    group_ids,
                })
                .await?;
            if !applied {
                debug!(owner, site_id, "site was scanned concurrently, skipping");
                continue;
            }

            let message = SiteUpdateMessage {
                site_id,
                site_name: site.name.clone(),
                new_updates: delta,
                time: now,
            };
            let delivery = self
                .bus
                .publish(&channel, RealtimeEvent::SiteUpdate(message))
                .await;
            info!(
                owner,
                site_id,
                new_updates = delta,
                delivered = delivery.delivered,
                "site has new captures"
            );
            scans.push(SiteScan {
                site_id,
                site_name: site.name,
                new_updates: delta,
                time: now,
            });
        }
        Ok(scans)
    }

    /// Scans every owner with a notification-enabled group. One owner's
    /// failure does not stop the others unless it is a storage error.
    pub async fn scan_all_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut changed = 0;
        for owner in self.store.notification_owners().await? {
            match self.scan_notifications_at(&owner, now).await {
                Ok(scans) => changed += scans.len(),
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => warn!(owner = %owner, error = %err, "notification scan failed"),
            }
        }
        Ok(changed)
    }

    /// Zeroes the site counter and subtracts it from every group holding the
    /// site and their ancestors. Returns the cleared count.
    pub async fn reset_site_notifications(&self, owner: &str, site_id: i64) -> Result<i64> {
        let tree = GroupTree::new(self.store.list_groups(owner).await?);
        let memberships = self.store.site_memberships(site_id).await?;
        let group_ids = tree.with_ancestors(memberships.iter().map(|gs| gs.group_id));
        let cleared = self
            .store
            .reset_site_counter(owner, site_id, &group_ids)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("site {site_id}")))?;
        info!(owner, site_id, cleared, "site notifications reset");
        Ok(cleared)
    }

    /// Runs [`scan_all_at`](Self::scan_all_at) every `interval` until `shutdown` flips.
    pub fn spawn_watcher(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.scan_all_at(Utc::now()).await {
                            Ok(changed) if changed > 0 => info!(changed, "notification scan finished"),
                            Ok(_) => debug!("notification scan found nothing new"),
                            Err(err) => error!(error = %err, "notification scan failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("notification watcher stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
