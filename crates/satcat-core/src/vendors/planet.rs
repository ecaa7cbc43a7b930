use bytes::Bytes;
use satcat_vendors::{Vendor, VendorPage};
use serde_json::{json, Value};

use super::{FetchQuery, PageCursor, VendorEndpoint};
use crate::error::Result;

pub const DEFAULT_API_URL: &str = "https://api.planet.com";
const ITEM_TYPE: &str = "PSScene";

/// Planet Data API. The first page is a quick-search POST; later pages
/// follow `_links._next`.
pub struct Planet {
    pub(super) endpoint: VendorEndpoint,
}

impl Planet {
    pub fn new(endpoint: VendorEndpoint) -> Self {
        Self { endpoint }
    }

    fn search_body(&self, query: &FetchQuery) -> Result<Value> {
        let mut filters = vec![json!({
            "type": "DateRangeFilter",
            "field_name": "acquired",
            "config": { "gte": query.start_param(), "lt": query.end_param() },
        })];
        if let Some(bbox) = query.region_bbox()? {
            filters.push(json!({
                "type": "GeometryFilter",
                "field_name": "geometry",
                "config": {
                    "type": "Polygon",
                    "coordinates": [[
                        [bbox.min_lon, bbox.min_lat],
                        [bbox.max_lon, bbox.min_lat],
                        [bbox.max_lon, bbox.max_lat],
                        [bbox.min_lon, bbox.max_lat],
                        [bbox.min_lon, bbox.min_lat],
                    ]],
                },
            }));
        }
        Ok(json!({
            "item_types": [ITEM_TYPE],
            "filter": { "type": "AndFilter", "config": filters },
        }))
    }

    pub(super) async fn search(&self, query: &FetchQuery, cursor: &PageCursor) -> Result<VendorPage> {
        let body = match cursor {
            PageCursor::Link(link) => self.endpoint.session.json(|client| client.get(link)).await?,
            _ => {
                let url = self.endpoint.url("/data/v1/quick-search");
                let payload = self.search_body(query)?;
                let page_size = self.endpoint.page_size.to_string();
                self.endpoint
                    .session
                    .json(|client| {
                        client
                            .post(&url)
                            .query(&[("_page_size", page_size.as_str())])
                            .json(&payload)
                    })
                    .await?
            }
        };
        Ok(satcat_vendors::parse_page(Vendor::Planet, &body)?)
    }

    pub(super) async fn items(&self, id: &str) -> Result<Vec<Value>> {
        let url = self.endpoint.url(&format!("/data/v1/item-types/{ITEM_TYPE}/items/{id}"));
        let body = self.endpoint.session.json(|client| client.get(&url)).await?;
        Ok(vec![body])
    }

    pub(super) async fn thumbnail(&self, id: &str) -> Result<Bytes> {
        let url = self.endpoint.url(&format!("/data/v1/item-types/{ITEM_TYPE}/items/{id}/thumb"));
        self.endpoint.session.bytes(|client| client.get(&url)).await
    }
}
