use bytes::Bytes;
use satcat_vendors::{Vendor, VendorPage};
use serde_json::Value;

use super::{FetchQuery, PageCursor, VendorEndpoint};
use crate::error::Result;

pub const DEFAULT_API_URL: &str = "https://search.foundation.api.oneatlas.airbus.com";
pub const DEFAULT_AUTH_URL: &str =
    "https://authenticate.foundation.api.oneatlas.airbus.com/auth/realms/IDP/protocol/openid-connect/token";

/// OneAtlas opensearch. Pages are numbered from 1.
pub struct Airbus {
    pub(super) endpoint: VendorEndpoint,
}

impl Airbus {
    pub fn new(endpoint: VendorEndpoint) -> Self {
        Self { endpoint }
    }

    pub(super) async fn search(&self, query: &FetchQuery, cursor: &PageCursor) -> Result<VendorPage> {
        let body = match cursor {
            PageCursor::Link(link) => self.endpoint.session.json(|client| client.get(link)).await?,
            _ => {
                let url = self.endpoint.url("/api/v2/opensearch");
                let mut params = vec![
                    (
                        "acquisitionDate",
                        format!("[{},{}[", query.start_param(), query.end_param()),
                    ),
                    ("itemsPerPage", self.endpoint.page_size.to_string()),
                    ("startPage", cursor.number().to_string()),
                    ("sortBy", "acquisitionDate".to_string()),
                ];
                if let Some(wkt) = query.region_wkt() {
                    params.push(("relation", "intersects".to_string()));
                    params.push(("geometry", wkt));
                }
                self.endpoint
                    .session
                    .json(|client| client.get(&url).query(&params))
                    .await?
            }
        };
        Ok(satcat_vendors::parse_page(Vendor::Airbus, &body)?)
    }

    pub(super) async fn items(&self, id: &str) -> Result<Vec<Value>> {
        let url = self.endpoint.url("/api/v2/opensearch");
        let body = self
            .endpoint
            .session
            .json(|client| client.get(&url).query(&[("id", id)]))
            .await?;
        Ok(satcat_vendors::parse_page(Vendor::Airbus, &body)?.items)
    }

    pub(super) async fn thumbnail(&self, id: &str) -> Result<Bytes> {
        let url = self.endpoint.url(&format!("/api/v2/items/{id}/quicklook"));
        self.endpoint.session.bytes(|client| client.get(&url)).await
    }
}
