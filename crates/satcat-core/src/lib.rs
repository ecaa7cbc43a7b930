pub mod address;
pub mod analytics;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod geocoder;
pub mod geometry;
pub mod history;
pub mod ingestion;
pub mod notifications;
pub mod object_store;
pub mod realtime;
pub mod sites;
pub mod store;
pub mod vendors;

pub use error::{CatalogError, Result};
pub use satcat_vendors::{CanonicalRecord, Vendor};
