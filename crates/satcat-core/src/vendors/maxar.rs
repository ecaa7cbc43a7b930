use bytes::Bytes;
use satcat_vendors::{Vendor, VendorPage};
use serde_json::Value;

use super::{FetchQuery, PageCursor, VendorEndpoint};
use crate::error::Result;

pub const DEFAULT_API_URL: &str = "https://api.maxar.com";

/// Maxar discovery (STAC flavoured), numbered pages.
pub struct Maxar {
    pub(super) endpoint: VendorEndpoint,
}

impl Maxar {
    pub fn new(endpoint: VendorEndpoint) -> Self {
        Self { endpoint }
    }

    pub(super) async fn search(&self, query: &FetchQuery, cursor: &PageCursor) -> Result<VendorPage> {
        let body = match cursor {
            PageCursor::Link(link) => self.endpoint.session.json(|client| client.get(link)).await?,
            _ => {
                let url = self.endpoint.url("/discovery/v1/search");
                let mut params = vec![
                    ("datetime", format!("{}/{}", query.start_param(), query.end_param())),
                    ("limit", self.endpoint.page_size.to_string()),
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
        Ok(satcat_vendors::parse_page(Vendor::Maxar, &body)?)
    }

    pub(super) async fn items(&self, id: &str) -> Result<Vec<Value>> {
        let url = self.endpoint.url("/discovery/v1/search");
        let body = self
            .endpoint
            .session
            .json(|client| client.get(&url).query(&[("ids", id)]))
            .await?;
        Ok(satcat_vendors::parse_page(Vendor::Maxar, &body)?.items)
    }

    pub(super) async fn thumbnail(&self, id: &str) -> Result<Bytes> {
        let url = self.endpoint.url(&format!("/browse-archive/v1/browse/{id}"));
        self.endpoint.session.bytes(|client| client.get(&url)).await
    }
}
