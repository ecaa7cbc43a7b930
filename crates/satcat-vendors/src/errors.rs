use thiserror::Error;

use crate::model::Vendor;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("{vendor} payload did not match the expected shape: {source}")]
    Payload {
        vendor: Vendor,
        #[source]
        source: serde_json::Error,
    },

    #[error("{vendor} record is missing required field '{field}'")]
    MissingField { vendor: Vendor, field: &'static str },

    #[error("{vendor} field '{field}' has unparseable datetime '{value}'")]
    InvalidDatetime {
        vendor: Vendor,
        field: &'static str,
        value: String,
    },

    #[error("{vendor} record {vendor_id} has invalid geometry: {message}")]
    InvalidGeometry {
        vendor: Vendor,
        vendor_id: String,
        message: String,
    },

    #[error("{vendor} record {vendor_id} violates invariant: {message}")]
    InvalidRecord {
        vendor: Vendor,
        vendor_id: String,
        message: String,
    },

    #[error("unknown vendor '{0}'")]
    UnknownVendor(String),
}

impl NormalizeError {
    pub fn is_geometry(&self) -> bool {
        matches!(self, NormalizeError::InvalidGeometry { .. })
    }
}
