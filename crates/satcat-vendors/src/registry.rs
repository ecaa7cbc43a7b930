use serde_json::Value;

use crate::errors::NormalizeError;
use crate::formats::{airbus, blacksky, capella, maxar, planet, skyfi};
use crate::model::{CanonicalRecord, Vendor, VendorPage};

/// Splits a raw search response into items and paging hints.
pub fn parse_page(vendor: Vendor, body: &Value) -> Result<VendorPage, NormalizeError> {
    match vendor {
        Vendor::Airbus => airbus::parse_page(body),
        Vendor::BlackSky => blacksky::parse_page(body),
        Vendor::Capella => capella::parse_page(body),
        Vendor::Maxar => maxar::parse_page(body),
        Vendor::Planet => planet::parse_page(body),
        Vendor::SkyFi => skyfi::parse_page(body),
    }
}

/// Maps one raw vendor item onto the canonical schema and checks its invariants.
pub fn normalize_item(vendor: Vendor, item: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let record = match vendor {
        Vendor::Airbus => airbus::normalize(item),
        Vendor::BlackSky => blacksky::normalize(item),
        Vendor::Capella => capella::normalize(item),
        Vendor::Maxar => maxar::normalize(item),
        Vendor::Planet => planet::normalize(item),
        Vendor::SkyFi => skyfi::normalize(item),
    }?;
    record.validate()?;
    Ok(record)
}

/// Normalizes every item on a page, keeping per-item failures alongside successes
/// so one bad record never hides the rest of the page.
pub fn normalize_page(vendor: Vendor, page: &VendorPage) -> Vec<Result<CanonicalRecord, NormalizeError>> {
    page.items
        .iter()
        .map(|item| normalize_item(vendor, item))
        .collect()
}
