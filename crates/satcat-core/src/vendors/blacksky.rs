use bytes::Bytes;
use satcat_vendors::{Vendor, VendorPage};
use serde_json::Value;

use super::{FetchQuery, PageCursor, VendorEndpoint};
use crate::error::Result;

pub const DEFAULT_API_URL: &str = "https://api.blacksky.com";

pub struct BlackSky {
    pub(super) endpoint: VendorEndpoint,
}

impl BlackSky {
    pub fn new(endpoint: VendorEndpoint) -> Self {
        Self { endpoint }
    }

    pub(super) async fn search(&self, query: &FetchQuery, cursor: &PageCursor) -> Result<VendorPage> {
        let body = match cursor {
            PageCursor::Link(link) => self.endpoint.session.json(|client| client.get(link)).await?,
            _ => {
                let url = self.endpoint.url("/v1/catalog/images");
                let mut params = vec![
                    ("startTime", query.start_param()),
                    ("endTime", query.end_param()),
                    ("pageSize", self.endpoint.page_size.to_string()),
                    ("page", cursor.number().to_string()),
                ];
                if let Some(bbox) = query.region_bbox()? {
                    params.push((
                        "bbox",
                        format!("{},{},{},{}", bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat),
                    ));
                }
                self.endpoint
                    .session
                    .json(|client| client.get(&url).query(&params))
                    .await?
            }
        };
        Ok(satcat_vendors::parse_page(Vendor::BlackSky, &body)?)
    }

    pub(super) async fn items(&self, id: &str) -> Result<Vec<Value>> {
        let url = self.endpoint.url(&format!("/v1/catalog/images/{id}"));
        let body = self.endpoint.session.json(|client| client.get(&url)).await?;
        Ok(vec![body])
    }

    pub(super) async fn thumbnail(&self, id: &str) -> Result<Bytes> {
        let url = self.endpoint.url(&format!("/v1/catalog/images/{id}/thumbnail"));
        self.endpoint.session.bytes(|client| client.get(&url)).await
    }
}
