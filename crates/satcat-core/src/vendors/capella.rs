use bytes::Bytes;
use satcat_vendors::{Vendor, VendorPage};
use serde_json::{json, Value};

use super::{FetchQuery, PageCursor, VendorEndpoint};
use crate::error::{CatalogError, Result};

pub const DEFAULT_API_URL: &str = "https://api.capellaspace.com";
pub const DEFAULT_AUTH_URL: &str = "https://api.capellaspace.com/token";
const COLLECTION: &str = "capella-geo";

/// Capella STAC search: POSTed bbox/datetime bodies, one day per window.
pub struct Capella {
    pub(super) endpoint: VendorEndpoint,
}

impl Capella {
    pub fn new(endpoint: VendorEndpoint) -> Self {
        Self { endpoint }
    }

    pub(super) async fn search(&self, query: &FetchQuery, cursor: &PageCursor) -> Result<VendorPage> {
        let body = match cursor {
            PageCursor::Link(link) => self.endpoint.session.json(|client| client.get(link)).await?,
            _ => {
                let url = self.endpoint.url("/catalog/search");
                let mut payload = json!({
                    "datetime": format!("{}/{}", query.start_param(), query.end_param()),
                    "limit": self.endpoint.page_size,
                    "page": cursor.number(),
                    "sortby": [{ "field": "datetime", "direction": "asc" }],
                });
                if let Some(bbox) = query.region_bbox()? {
                    payload["bbox"] = json!([bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat]);
                }
                self.endpoint
                    .session
                    .json(|client| client.post(&url).json(&payload))
                    .await?
            }
        };
        Ok(satcat_vendors::parse_page(Vendor::Capella, &body)?)
    }

    pub(super) async fn items(&self, id: &str) -> Result<Vec<Value>> {
        let url = self.endpoint.url(&format!("/catalog/collections/{COLLECTION}/items/{id}"));
        let body = self.endpoint.session.json(|client| client.get(&url)).await?;
        Ok(vec![body])
    }

    /// The item's `assets.thumbnail.href` is a pre-signed URL.
    pub(super) async fn thumbnail(&self, id: &str) -> Result<Bytes> {
        let item = self.items(id).await?;
        let href = item
            .first()
            .and_then(|item| item.pointer("/assets/thumbnail/href"))
            .and_then(Value::as_str)
            .ok_or_else(|| CatalogError::NotFound(format!("capella thumbnail for {id}")))?
            .to_string();
        self.endpoint.session.public_bytes(&href).await
    }
}
