use std::time::Duration;

use satcat_vendors::{NormalizeError, Vendor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("geodesic computation out of range: {0}")]
    GeodesicOutOfRange(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("{vendor} authentication failed: {message}")]
    VendorAuthFailed { vendor: Vendor, message: String },

    #[error("{vendor} rate limited after {attempts} attempts")]
    VendorRateLimited { vendor: Vendor, attempts: u32 },

    #[error("{vendor} transient failure: {message}")]
    VendorTransient { vendor: Vendor, message: String },

    #[error("{vendor} rejected the request with status {status}: {message}")]
    VendorRejected {
        vendor: Vendor,
        status: u16,
        message: String,
    },

    #[error("database query failed: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the orchestrator does with a window whose fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDisposition {
    /// Keep the cursor where it is so the next pass retries.
    Abandon,
    /// Record the failure and move the cursor past the window.
    Reject,
    /// Stop the whole pass.
    Fatal,
}

impl CatalogError {
    /// Short machine-readable category used in HTTP bodies and history rows.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::InvalidInput(_) => "invalid_input",
            CatalogError::InvalidGeometry(_) => "invalid_geometry",
            CatalogError::GeodesicOutOfRange(_) => "geodesic_out_of_range",
            CatalogError::InvalidRecord(_) => "invalid_record",
            CatalogError::VendorAuthFailed { .. } => "vendor_auth_failed",
            CatalogError::VendorRateLimited { .. } => "vendor_rate_limited",
            CatalogError::VendorTransient { .. } => "vendor_transient",
            CatalogError::VendorRejected { .. } => "vendor_rejected",
            CatalogError::Storage(_) => "storage",
            CatalogError::Http(_) => "http",
            CatalogError::ExternalService(_) => "external_service",
            CatalogError::ObjectStore(_) => "object_store",
            CatalogError::Config(_) => "config",
            CatalogError::NotFound(_) => "not_found",
            CatalogError::Conflict(_) => "conflict",
            CatalogError::Cancelled => "cancelled",
            CatalogError::Timeout(_) => "timeout",
            CatalogError::Json(_) => "json",
            CatalogError::Io(_) => "io",
        }
    }

    pub fn window_disposition(&self) -> WindowDisposition {
        match self {
            CatalogError::VendorRejected { .. } => WindowDisposition::Reject,
            CatalogError::Storage(_) => WindowDisposition::Fatal,
            _ => WindowDisposition::Abandon,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, CatalogError::Storage(_))
    }

    pub fn is_vendor(&self) -> bool {
        matches!(
            self,
            CatalogError::VendorAuthFailed { .. }
                | CatalogError::VendorRateLimited { .. }
                | CatalogError::VendorTransient { .. }
                | CatalogError::VendorRejected { .. }
        )
    }
}

impl From<NormalizeError> for CatalogError {
    fn from(err: NormalizeError) -> Self {
        if err.is_geometry() {
            CatalogError::InvalidGeometry(err.to_string())
        } else {
            CatalogError::InvalidRecord(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
