use chrono::Utc;
use futures::stream::{self, StreamExt};
use satcat_vendors::Vendor;
use tracing::{info, warn};

use super::{Orchestrator, PassReport, VendorReport, VendorStatus};
use crate::error::Result;
use crate::history::{NewHistoryEntry, RunMode, WindowCounts, WindowOutcome};
use crate::object_store::ObjectStore;
use crate::vendors::VendorAdapter;

const THUMBNAIL_CONTENT_TYPE: &str = "image/png";

enum ThumbnailResult {
    Uploaded,
    Fetched,
    Failed,
}

impl Orchestrator {
    /// Fetches thumbnails for the given ids and uploads them to the object
    /// store. Individual failures are counted as skipped.
    pub async fn run_thumbnails(&self, requests: Vec<(Vendor, Vec<String>)>) -> Result<PassReport> {
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(requests.len());
        for (vendor, ids) in requests {
            let Some(adapter) = self.adapters.iter().find(|a| a.vendor() == vendor) else {
                warn!(vendor = %vendor, "vendor is not configured, skipping thumbnails");
                reports.push(VendorReport::failed(vendor, "vendor is not configured"));
                continue;
            };
            reports.push(self.vendor_thumbnails(adapter, ids).await?);
        }
        Ok(PassReport {
            mode: RunMode::Thumbnails,
            dry_run: self.options.dry_run,
            started_at,
            vendors: reports,
        })
    }

    async fn vendor_thumbnails(&self, adapter: &VendorAdapter, ids: Vec<String>) -> Result<VendorReport> {
        let vendor = adapter.vendor();
        let started = Utc::now();
        let mut counts = WindowCounts {
            records_seen: ids.len() as i64,
            ..WindowCounts::default()
        };

        let results: Vec<Result<ThumbnailResult>> = stream::iter(ids)
            .map(|id| self.one_thumbnail(adapter, id))
            .buffer_unordered(self.options.thumbnail_concurrency)
            .collect()
            .await;
        for result in results {
            match result? {
                ThumbnailResult::Uploaded => counts.updated += 1,
                ThumbnailResult::Fetched => {}
                ThumbnailResult::Failed => counts.skipped += 1,
            }
        }

        let finished = Utc::now();
        if !self.options.dry_run {
            self.store
                .append_history(NewHistoryEntry {
                    vendor,
                    mode: RunMode::Thumbnails,
                    outcome: WindowOutcome::Completed,
                    window_start: started,
                    window_end: finished,
                    counts,
                    message: None,
                })
                .await?;
        }
        info!(vendor = %vendor, uploaded = counts.updated, failed = counts.skipped, "thumbnails finished");

        let status = if counts.records_seen > 0 && counts.skipped == counts.records_seen {
            VendorStatus::Failed
        } else if counts.skipped > 0 {
            VendorStatus::Partial
        } else {
            VendorStatus::Completed
        };
        Ok(VendorReport {
            vendor,
            status,
            window_start: Some(started),
            window_end: Some(finished),
            counts,
            error: None,
        })
    }

    async fn one_thumbnail(&self, adapter: &VendorAdapter, vendor_id: String) -> Result<ThumbnailResult> {
        let vendor = adapter.vendor();
        let bytes = match adapter.fetch_thumbnail(&vendor_id).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(vendor = %vendor, vendor_id = %vendor_id, error = %err, "thumbnail fetch failed");
                return Ok(ThumbnailResult::Failed);
            }
        };
        if self.options.dry_run {
            return Ok(ThumbnailResult::Fetched);
        }

        let key = ObjectStore::thumbnail_key(vendor, &vendor_id);
        let url = match self.object_store.put(bytes, &key, THUMBNAIL_CONTENT_TYPE).await {
            Ok(url) => url,
            Err(err) => {
                warn!(vendor = %vendor, vendor_id = %vendor_id, error = %err, "thumbnail upload failed");
                return Ok(ThumbnailResult::Failed);
            }
        };
        if !self.store.mark_image_uploaded(vendor, &vendor_id, &url).await? {
            warn!(vendor = %vendor, vendor_id = %vendor_id, "uploaded thumbnail for an unknown capture");
        }
        Ok(ThumbnailResult::Uploaded)
    }
}

