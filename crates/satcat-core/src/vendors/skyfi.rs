use bytes::Bytes;
use satcat_vendors::{Vendor, VendorPage};
use serde_json::{json, Value};

use super::{FetchQuery, PageCursor, VendorEndpoint};
use crate::error::{CatalogError, Result};

pub const DEFAULT_API_URL: &str = "https://app.skyfi.com";

/// SkyFi archive search. Pages are zero-based on the wire.
pub struct SkyFi {
    pub(super) endpoint: VendorEndpoint,
}

impl SkyFi {
    pub fn new(endpoint: VendorEndpoint) -> Self {
        Self { endpoint }
    }

    pub(super) async fn search(&self, query: &FetchQuery, cursor: &PageCursor) -> Result<VendorPage> {
        let body = match cursor {
            PageCursor::Link(link) => self.endpoint.session.json(|client| client.get(link)).await?,
            _ => {
                let url = self.endpoint.url("/platform-api/archives");
                let mut payload = json!({
                    "fromDate": query.start_param(),
                    "toDate": query.end_param(),
                    "pageNumber": cursor.number().saturating_sub(1),
                    "pageSize": self.endpoint.page_size,
                });
                if let Some(bbox) = query.region_bbox()? {
                    let rect = crate::geometry::polygon_from_geometry(geo::Geometry::Rect(geo::Rect::new(
                        geo::coord! { x: bbox.min_lon, y: bbox.min_lat },
                        geo::coord! { x: bbox.max_lon, y: bbox.max_lat },
                    )))?;
                    payload["aoi"] = json!(crate::geometry::wkt_from_polygon(&rect));
                }
                self.endpoint
                    .session
                    .json(|client| client.post(&url).json(&payload))
                    .await?
            }
        };
        Ok(satcat_vendors::parse_page(Vendor::SkyFi, &body)?)
    }

    pub(super) async fn items(&self, id: &str) -> Result<Vec<Value>> {
        let url = self.endpoint.url(&format!("/platform-api/archives/{id}"));
        let body = self.endpoint.session.json(|client| client.get(&url)).await?;
        Ok(vec![body])
    }

    pub(super) async fn thumbnail(&self, id: &str) -> Result<Bytes> {
        let items = self.items(id).await?;
        let href = items
            .first()
            .map(|item| satcat_vendors::normalize_item(Vendor::SkyFi, item))
            .transpose()?
            .and_then(|record| record.thumbnail_url)
            .ok_or_else(|| CatalogError::NotFound(format!("skyfi thumbnail for {id}")))?;
        self.endpoint.session.public_bytes(&href).await
    }
}
