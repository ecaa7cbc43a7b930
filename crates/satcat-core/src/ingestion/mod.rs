//! Ingestion passes: per-vendor window planning, paging, upserts and the
//! history rows that make passes resumable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geo::Polygon;
use satcat_vendors::{CanonicalRecord, NormalizeError, Vendor};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::catalog::{PreparedCapture, UpsertOutcome};
use crate::config::{AppConfig, IngestionSettings};
use crate::error::{CatalogError, Result, WindowDisposition};
use crate::geocoder::ReverseGeocoder;
use crate::geometry;
use crate::history::{NewHistoryEntry, RunMode, WindowCounts, WindowOutcome};
use crate::notifications::NotificationWatcher;
use crate::object_store::ObjectStore;
use crate::realtime::{NewRecordsMessage, RealtimeBus, RealtimeEvent};
use crate::store::Store;
use crate::vendors::{FetchQuery, PageCursor, VendorAdapter};

mod thumbnails;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionOptions {
    pub concurrency: usize,
    pub window_timeout: Duration,
    pub pass_timeout: Duration,
    pub thumbnail_concurrency: usize,
    pub dry_run: bool,
    /// Empty means every configured vendor.
    pub vendors: Vec<Vendor>,
    pub region: Option<Polygon<f64>>,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self::from_parts(&IngestionSettings::default(), None)
    }
}

impl IngestionOptions {
    fn from_parts(settings: &IngestionSettings, region: Option<Polygon<f64>>) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            window_timeout: settings.window_timeout(),
            pass_timeout: settings.pass_timeout(),
            thumbnail_concurrency: settings.thumbnail_concurrency.max(1),
            dry_run: false,
            vendors: Vec::new(),
            region,
        }
    }

    pub fn from_settings(settings: &IngestionSettings) -> Result<Self> {
        let region = settings
            .region_wkt
            .as_deref()
            .map(geometry::polygon_from_wkt)
            .transpose()?;
        Ok(Self::from_parts(settings, region))
    }

    fn includes(&self, vendor: Vendor) -> bool {
        self.vendors.is_empty() || self.vendors.contains(&vendor)
    }
}

/// Builds an adapter for every enabled vendor that has credentials.
pub fn adapters_from_config(config: &AppConfig) -> Result<Vec<Arc<VendorAdapter>>> {
    let mut adapters = Vec::new();
    for vendor in Vendor::ALL {
        if let Some(adapter) = VendorAdapter::from_config(vendor, config.vendor(vendor), &config.http)? {
            adapters.push(Arc::new(adapter));
        }
    }
    Ok(adapters)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorStatus {
    /// Every window processed.
    Completed,
    /// Some progress recorded before a window was abandoned.
    Partial,
    /// Finished, but at least one window was refused by the vendor.
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorReport {
    pub vendor: Vendor,
    pub status: VendorStatus,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub counts: WindowCounts,
    pub error: Option<String>,
}

impl VendorReport {
    fn failed(vendor: Vendor, error: impl Into<String>) -> Self {
        Self {
            vendor,
            status: VendorStatus::Failed,
            window_start: None,
            window_end: None,
            counts: WindowCounts::default(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub mode: RunMode,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub vendors: Vec<VendorReport>,
}

impl PassReport {
    /// True when at least one vendor ran and none of them succeeded.
    pub fn all_failed(&self) -> bool {
        !self.vendors.is_empty() && self.vendors.iter().all(|v| v.status == VendorStatus::Failed)
    }

    pub fn totals(&self) -> WindowCounts {
        let mut totals = WindowCounts::default();
        for report in &self.vendors {
            totals.merge(&report.counts);
        }
        totals
    }
}

/// Where a vendor's pass starts.
#[derive(Debug, Clone, Copy)]
enum PassStart {
    Cursor,
    DaysBack(i64),
}

/// Tracks the completed stretch of a vendor's pass that has not been
/// written to history yet.
struct Progress {
    segment_start: DateTime<Utc>,
    end: DateTime<Utc>,
    pending: WindowCounts,
    total: WindowCounts,
    any_progress: bool,
    rejected: bool,
}

impl Progress {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            segment_start: start,
            end: start,
            pending: WindowCounts::default(),
            total: WindowCounts::default(),
            any_progress: false,
            rejected: false,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    adapters: Vec<Arc<VendorAdapter>>,
    geocoder: Option<Arc<ReverseGeocoder>>,
    object_store: ObjectStore,
    watcher: Option<NotificationWatcher>,
    bus: Option<Arc<RealtimeBus>>,
    options: IngestionOptions,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, adapters: Vec<Arc<VendorAdapter>>, options: IngestionOptions) -> Self {
        Self {
            store,
            adapters,
            geocoder: None,
            object_store: ObjectStore::noop(),
            watcher: None,
            bus: None,
            options,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_object_store(mut self, object_store: ObjectStore) -> Self {
        self.object_store = object_store;
        self
    }

    pub fn with_watcher(mut self, watcher: NotificationWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn with_bus(mut self, bus: Arc<RealtimeBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    fn selected(&self) -> Vec<Arc<VendorAdapter>> {
        self.adapters
            .iter()
            .filter(|a| self.options.includes(a.vendor()))
            .cloned()
            .collect()
    }

    /// Resumes every vendor from its cursor up to now.
    pub async fn run_incremental(&self, shutdown: watch::Receiver<bool>) -> Result<PassReport> {
        self.run_incremental_at(Utc::now(), shutdown).await
    }

    pub async fn run_incremental_at(&self, now: DateTime<Utc>, shutdown: watch::Receiver<bool>) -> Result<PassReport> {
        self.run_pass(RunMode::Incremental, PassStart::Cursor, now, shutdown).await
    }

    /// Re-fetches the last `days` days. Backfill rows never move the cursor.
    pub async fn run_backfill(&self, days: i64, shutdown: watch::Receiver<bool>) -> Result<PassReport> {
        self.run_backfill_at(days, Utc::now(), shutdown).await
    }

    pub async fn run_backfill_at(
        &self,
        days: i64,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<PassReport> {
        if days <= 0 {
            return Err(CatalogError::InvalidInput(format!("backfill days must be positive, got {days}")));
        }
        self.run_pass(RunMode::Backfill, PassStart::DaysBack(days), now, shutdown).await
    }

    async fn run_pass(
        &self,
        mode: RunMode,
        start: PassStart,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<PassReport> {
        let adapters = self.selected();
        info!(
            mode = mode.as_str(),
            vendors = adapters.len(),
            dry_run = self.options.dry_run,
            "ingestion pass starting"
        );

        let (cancel_tx, cancel_rx) = watch::channel(*shutdown.borrow());
        let guard = spawn_cancel_forwarder(cancel_tx, shutdown, self.options.pass_timeout);
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let vendor = adapter.vendor();
            let orchestrator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel_rx.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| CatalogError::Cancelled)?;
                orchestrator.run_vendor(&adapter, mode, start, now, cancel).await
            });
            handles.push((vendor, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut fatal = None;
        for (vendor, handle) in handles {
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(err)) => {
                    error!(vendor = %vendor, error = %err, "vendor pass aborted");
                    reports.push(VendorReport::failed(vendor, err.to_string()));
                    if err.window_disposition() == WindowDisposition::Fatal && fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(join_err) => {
                    error!(vendor = %vendor, error = %join_err, "vendor task panicked");
                    reports.push(VendorReport::failed(vendor, join_err.to_string()));
                }
            }
        }
        guard.abort();

        if let Some(err) = fatal {
            return Err(err);
        }

        let report = PassReport {
            mode,
            dry_run: self.options.dry_run,
            started_at: now,
            vendors: reports,
        };
        if !self.options.dry_run {
            self.after_pass(&report, now).await;
        }
        let totals = report.totals();
        info!(
            mode = mode.as_str(),
            inserted = totals.inserted,
            updated = totals.updated,
            skipped = totals.skipped,
            "ingestion pass finished"
        );
        Ok(report)
    }

    async fn after_pass(&self, report: &PassReport, now: DateTime<Utc>) {
        if let Some(bus) = &self.bus {
            for vendor in report.vendors.iter().filter(|v| v.counts.inserted > 0) {
                bus.broadcast(RealtimeEvent::NewRecords(NewRecordsMessage {
                    vendor: vendor.vendor,
                    inserted: vendor.counts.inserted,
                    window_end: vendor.window_end.unwrap_or(now),
                }))
                .await;
            }
        }
        if let Some(watcher) = &self.watcher {
            if let Err(err) = watcher.scan_all_at(now).await {
                error!(error = %err, "post-ingestion notification scan failed");
            }
        }
    }

    async fn append(&self, entry: NewHistoryEntry) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }
        self.store.append_history(entry).await.map(|_| ())
    }

    fn entry(
        vendor: Vendor,
        mode: RunMode,
        outcome: WindowOutcome,
        window: (DateTime<Utc>, DateTime<Utc>),
        counts: WindowCounts,
        message: Option<String>,
    ) -> NewHistoryEntry {
        NewHistoryEntry {
            vendor,
            mode,
            outcome,
            window_start: window.0,
            window_end: window.1,
            counts,
            message,
        }
    }

    async fn flush_completed(&self, vendor: Vendor, mode: RunMode, progress: &mut Progress, force: bool) -> Result<()> {
        if progress.end <= progress.segment_start && !force {
            return Ok(());
        }
        self.append(Self::entry(
            vendor,
            mode,
            WindowOutcome::Completed,
            (progress.segment_start, progress.end),
            progress.pending,
            None,
        ))
        .await?;
        progress.segment_start = progress.end;
        progress.pending = WindowCounts::default();
        Ok(())
    }

    async fn run_vendor(
        &self,
        adapter: &VendorAdapter,
        mode: RunMode,
        start: PassStart,
        now: DateTime<Utc>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<VendorReport> {
        let vendor = adapter.vendor();
        let start = match start {
            PassStart::Cursor => self
                .store
                .latest_cursor(vendor)
                .await?
                .map(|cursor| cursor.window_end)
                .unwrap_or_else(|| adapter.epoch()),
            PassStart::DaysBack(days) => now - chrono::Duration::days(days),
        };

        let mut report = VendorReport {
            vendor,
            status: VendorStatus::Completed,
            window_start: Some(start),
            window_end: Some(now),
            counts: WindowCounts::default(),
            error: None,
        };
        if start >= now {
            info!(vendor = %vendor, "cursor is current, nothing to fetch");
            return Ok(report);
        }

        let mut progress = Progress::new(start);
        let mut abandoned: Option<CatalogError> = None;
        for (window_start, window_end) in adapter.windows(start, now) {
            let query = FetchQuery::new(window_start, window_end).with_region(self.options.region.clone());
            let mut counts = WindowCounts::default();
            let outcome = if *cancel.borrow() {
                Err(CatalogError::Cancelled)
            } else {
                tokio::time::timeout(
                    self.options.window_timeout,
                    self.ingest_window(adapter, &query, &mut counts, &mut cancel),
                )
                .await
                .unwrap_or(Err(CatalogError::Timeout(self.options.window_timeout)))
            };
            progress.total.merge(&counts);

            let Err(err) = outcome else {
                progress.pending.merge(&counts);
                progress.end = window_end;
                progress.any_progress = true;
                continue;
            };

            match err.window_disposition() {
                WindowDisposition::Fatal => return Err(err),
                WindowDisposition::Reject => {
                    warn!(vendor = %vendor, %window_start, %window_end, error = %err, "window rejected");
                    self.flush_completed(vendor, mode, &mut progress, false).await?;
                    self.append(Self::entry(
                        vendor,
                        mode,
                        WindowOutcome::Rejected,
                        (window_start, window_end),
                        counts,
                        Some(err.to_string()),
                    ))
                    .await?;
                    progress.segment_start = window_end;
                    progress.end = window_end;
                    progress.rejected = true;
                    report.error = Some(err.to_string());
                }
                WindowDisposition::Abandon => {
                    warn!(vendor = %vendor, %window_start, error = %err, "window abandoned");
                    self.flush_completed(vendor, mode, &mut progress, false).await?;
                    self.append(Self::entry(
                        vendor,
                        mode,
                        WindowOutcome::Abandoned,
                        (progress.end, now),
                        counts,
                        Some(err.to_string()),
                    ))
                    .await?;
                    abandoned = Some(err);
                    break;
                }
            }
        }

        if abandoned.is_none() && (progress.end > progress.segment_start || !progress.rejected) {
            self.flush_completed(vendor, mode, &mut progress, true).await?;
        }

        report.counts = progress.total;
        report.window_end = Some(progress.end);
        report.status = match abandoned {
            Some(err) => {
                report.error = Some(err.to_string());
                if progress.any_progress || progress.rejected {
                    VendorStatus::Partial
                } else {
                    VendorStatus::Failed
                }
            }
            None if progress.rejected => VendorStatus::Rejected,
            None => VendorStatus::Completed,
        };
        info!(
            vendor = %vendor,
            status = ?report.status,
            inserted = report.counts.inserted,
            updated = report.counts.updated,
            duplicates = report.counts.duplicates,
            skipped = report.counts.skipped,
            "vendor pass finished"
        );
        Ok(report)
    }

    /// Pages through one window. Cancellation is honored between pages and
    /// interrupts an in-flight request.
    async fn ingest_window(
        &self,
        adapter: &VendorAdapter,
        query: &FetchQuery,
        counts: &mut WindowCounts,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut cursor = PageCursor::First;
        loop {
            if *cancel.borrow() {
                return Err(CatalogError::Cancelled);
            }
            let page = tokio::select! {
                page = adapter.fetch_page(query, &cursor) => page?,
                _ = cancelled(cancel) => return Err(CatalogError::Cancelled),
            };
            for record in page.records {
                self.store_record(adapter.vendor(), query, record, counts).await?;
            }
            match page.next {
                Some(next) => cursor = next,
                None => return Ok(()),
            }
        }
    }

    async fn store_record(
        &self,
        vendor: Vendor,
        query: &FetchQuery,
        record: std::result::Result<CanonicalRecord, NormalizeError>,
        counts: &mut WindowCounts,
    ) -> Result<()> {
        counts.records_seen += 1;
        let prepared = match record.map_err(CatalogError::from).and_then(PreparedCapture::new) {
            Ok(prepared) => prepared,
            Err(err) => {
                counts.skipped += 1;
                warn!(vendor = %vendor, error = %err, "skipping record");
                return Ok(());
            }
        };
        let acquired = prepared.record.acquisition_datetime;
        if acquired < query.start || acquired >= query.end {
            info!(vendor = %vendor, vendor_id = %prepared.record.vendor_id, %acquired, "record outside requested window");
        }
        if self.options.dry_run {
            return Ok(());
        }

        let geocode = self.geocoder.as_ref().and_then(|geocoder| {
            match geocoder.lookup(prepared.centroid_lat, prepared.centroid_lon) {
                Ok(geocode) => Some(geocode),
                Err(err) => {
                    warn!(vendor = %vendor, vendor_id = %prepared.record.vendor_id, error = %err, "geocoding failed");
                    None
                }
            }
        });
        let vendor_id = prepared.record.vendor_id.clone();
        match self.store.upsert(prepared.with_geocode(geocode)).await {
            Ok(UpsertOutcome::Inserted) => counts.inserted += 1,
            Ok(UpsertOutcome::UpdatedInPlace) => counts.updated += 1,
            Ok(UpsertOutcome::DuplicateIgnored) => counts.duplicates += 1,
            Err(err) if err.is_storage() => return Err(err),
            Err(err) => {
                counts.skipped += 1;
                warn!(vendor = %vendor, vendor_id = %vendor_id, error = %err, "record rejected by store");
            }
        }
        Ok(())
    }
}

/// Resolves once the flag is set. A dropped sender never cancels.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sets the pass-wide cancel flag on external shutdown or when the pass
/// budget runs out.
fn spawn_cancel_forwarder(
    cancel: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
    budget: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancelled(&mut shutdown) => info!("shutdown requested, cancelling ingestion pass"),
            _ = tokio::time::sleep(budget) => warn!(?budget, "ingestion pass timed out"),
        }
        let _ = cancel.send(true);
    })
}
