pub mod errors;
pub mod formats;
pub mod model;
mod registry;

pub use errors::NormalizeError;
pub use formats::common::{
    footprint_from_geojson, footprint_from_wkt, normalize_cloud_cover, parse_datetime, round_to,
};
pub use model::{CanonicalRecord, Vendor, VendorPage};
pub use registry::{normalize_item, normalize_page, parse_page};

#[cfg(test)]
mod tests;
