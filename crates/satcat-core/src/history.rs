//! Append-only ingestion history. The resume cursor for a vendor is derived
//! from these rows rather than stored separately.

use chrono::{DateTime, Utc};
use satcat_vendors::Vendor;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Incremental,
    Backfill,
    Thumbnails,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Incremental => "incremental",
            RunMode::Backfill => "backfill",
            RunMode::Thumbnails => "thumbnails",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "incremental" => Ok(RunMode::Incremental),
            "backfill" => Ok(RunMode::Backfill),
            "thumbnails" => Ok(RunMode::Thumbnails),
            other => Err(CatalogError::InvalidRecord(format!("unknown run mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOutcome {
    Completed,
    /// Not processed; the next pass retries it.
    Abandoned,
    /// Permanently refused by the vendor; the cursor moves past it.
    Rejected,
}

impl WindowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowOutcome::Completed => "completed",
            WindowOutcome::Abandoned => "abandoned",
            WindowOutcome::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "completed" => Ok(WindowOutcome::Completed),
            "abandoned" => Ok(WindowOutcome::Abandoned),
            "rejected" => Ok(WindowOutcome::Rejected),
            other => Err(CatalogError::InvalidRecord(format!("unknown window outcome '{other}'"))),
        }
    }

    pub fn advances_cursor(&self) -> bool {
        matches!(self, WindowOutcome::Completed | WindowOutcome::Rejected)
    }
}

/// Record counts accumulated while processing a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounts {
    pub records_seen: i64,
    pub inserted: i64,
    pub updated: i64,
    pub duplicates: i64,
    pub skipped: i64,
}

impl WindowCounts {
    pub fn merge(&mut self, other: &WindowCounts) {
        self.records_seen += other.records_seen;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub vendor: Vendor,
    pub mode: RunMode,
    pub outcome: WindowOutcome,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub counts: WindowCounts,
    pub message: Option<String>,
}

/// One persisted history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionCursor {
    pub id: i64,
    pub vendor: Vendor,
    pub mode: RunMode,
    pub outcome: WindowOutcome,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub counts: WindowCounts,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IngestionCursor {
    pub fn advances_cursor(&self) -> bool {
        self.mode == RunMode::Incremental && self.outcome.advances_cursor()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub vendors: Vec<Vendor>,
    pub mode: Option<RunMode>,
    pub outcome: Option<WindowOutcome>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn matches(&self, row: &IngestionCursor) -> bool {
        (self.vendors.is_empty() || self.vendors.contains(&row.vendor))
            && self.mode.map_or(true, |mode| row.mode == mode)
            && self.outcome.map_or(true, |outcome| row.outcome == outcome)
            && self.since.map_or(true, |since| row.window_end >= since)
            && self.until.map_or(true, |until| row.window_start <= until)
    }
}
