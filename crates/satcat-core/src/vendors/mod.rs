//! Vendor adapters: the HTTP half of catalog ingestion. Payload parsing and
//! normalization live in `satcat-vendors`; this module pages through the
//! vendor APIs and hands raw pages to it.

use bytes::Bytes;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use geo::Polygon;
use satcat_vendors::{CanonicalRecord, NormalizeError, Vendor, VendorPage};
use serde_json::Value;
use tracing::warn;

use crate::config::{HttpSettings, VendorSettings};
use crate::error::{CatalogError, Result};
use crate::geometry::{self, BBox};

mod airbus;
mod blacksky;
mod capella;
mod maxar;
mod planet;
pub mod session;
mod skyfi;

pub use session::{AuthScheme, RetryPolicy, TokenExchange, VendorSession};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One search request: a time window plus an optional region of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub region: Option<Polygon<f64>>,
}

impl FetchQuery {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            region: None,
        }
    }

    pub fn with_region(mut self, region: Option<Polygon<f64>>) -> Self {
        self.region = region;
        self
    }

    pub(crate) fn start_param(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub(crate) fn end_param(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub(crate) fn region_bbox(&self) -> Result<Option<BBox>> {
        self.region.as_ref().map(geometry::bbox_from_polygon).transpose()
    }

    pub(crate) fn region_wkt(&self) -> Option<String> {
        self.region.as_ref().map(geometry::wkt_from_polygon)
    }
}

/// Where the next page of a search comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    First,
    Page(u32),
    Link(String),
}

impl PageCursor {
    pub fn number(&self) -> u32 {
        match self {
            PageCursor::Page(n) => *n,
            _ => 1,
        }
    }
}

#[derive(Debug)]
pub struct FetchedPage {
    pub records: Vec<std::result::Result<CanonicalRecord, NormalizeError>>,
    pub next: Option<PageCursor>,
}

/// Connection details common to every vendor.
pub struct VendorEndpoint {
    pub(crate) session: VendorSession,
    pub(crate) api_url: String,
    pub(crate) page_size: u32,
    pub(crate) batch_days: i64,
    pub(crate) epoch: DateTime<Utc>,
}

impl VendorEndpoint {
    pub fn new(session: VendorSession, api_url: impl Into<String>, settings: &VendorSettings) -> Self {
        let vendor = session.vendor();
        Self {
            session,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            page_size: settings.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1),
            batch_days: settings.batch_days.unwrap_or_else(|| vendor.default_batch_days()).max(1),
            epoch: settings.epoch.unwrap_or_else(|| vendor.epoch()),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Absolute links pass through; relative ones are joined to the API root.
    pub(crate) fn resolve_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.api_url, link.trim_start_matches('/'))
        }
    }

    /// Numbered paging continues while full pages keep arriving.
    pub(crate) fn next_numbered(&self, cursor: &PageCursor, page: &VendorPage) -> Option<PageCursor> {
        if let Some(link) = &page.next_link {
            return Some(PageCursor::Link(self.resolve_link(link)));
        }
        let current = cursor.number();
        let seen = u64::from(current) * u64::from(self.page_size);
        let full = page.items.len() as u64 >= u64::from(self.page_size);
        let more = page.total.map_or(full, |total| full && seen < total);
        more.then(|| PageCursor::Page(current + 1))
    }
}

/// One adapter per vendor, dispatched by tag.
pub enum VendorAdapter {
    Airbus(airbus::Airbus),
    BlackSky(blacksky::BlackSky),
    Capella(capella::Capella),
    Maxar(maxar::Maxar),
    Planet(planet::Planet),
    SkyFi(skyfi::SkyFi),
}

impl VendorAdapter {
    /// Builds the adapter for `vendor`, or `None` when it is disabled or has
    /// no credentials configured.
    pub fn from_config(vendor: Vendor, settings: &VendorSettings, http: &HttpSettings) -> Result<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }
        let Some(auth) = auth_scheme(vendor, settings) else {
            warn!(vendor = %vendor, "no credentials configured, skipping vendor");
            return Ok(None);
        };
        Self::with_auth(vendor, auth, settings, http).map(Some)
    }

    pub fn with_auth(
        vendor: Vendor,
        auth: AuthScheme,
        settings: &VendorSettings,
        http: &HttpSettings,
    ) -> Result<Self> {
        let retry = RetryPolicy::from_settings(http, settings.max_retries);
        let session = VendorSession::new(vendor, auth, http, retry)?;
        let api_url = settings
            .api_url
            .clone()
            .unwrap_or_else(|| default_api_url(vendor).to_string());
        let endpoint = VendorEndpoint::new(session, api_url, settings);
        Ok(match vendor {
            Vendor::Airbus => VendorAdapter::Airbus(airbus::Airbus::new(endpoint)),
            Vendor::BlackSky => VendorAdapter::BlackSky(blacksky::BlackSky::new(endpoint)),
            Vendor::Capella => VendorAdapter::Capella(capella::Capella::new(endpoint)),
            Vendor::Maxar => VendorAdapter::Maxar(maxar::Maxar::new(endpoint)),
            Vendor::Planet => VendorAdapter::Planet(planet::Planet::new(endpoint)),
            Vendor::SkyFi => VendorAdapter::SkyFi(skyfi::SkyFi::new(endpoint)),
        })
    }

    pub fn vendor(&self) -> Vendor {
        match self {
            VendorAdapter::Airbus(_) => Vendor::Airbus,
            VendorAdapter::BlackSky(_) => Vendor::BlackSky,
            VendorAdapter::Capella(_) => Vendor::Capella,
            VendorAdapter::Maxar(_) => Vendor::Maxar,
            VendorAdapter::Planet(_) => Vendor::Planet,
            VendorAdapter::SkyFi(_) => Vendor::SkyFi,
        }
    }

    fn endpoint(&self) -> &VendorEndpoint {
        match self {
            VendorAdapter::Airbus(a) => &a.endpoint,
            VendorAdapter::BlackSky(a) => &a.endpoint,
            VendorAdapter::Capella(a) => &a.endpoint,
            VendorAdapter::Maxar(a) => &a.endpoint,
            VendorAdapter::Planet(a) => &a.endpoint,
            VendorAdapter::SkyFi(a) => &a.endpoint,
        }
    }

    pub fn batch_days(&self) -> i64 {
        self.endpoint().batch_days
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.endpoint().epoch
    }

    /// Splits `[start, end)` into consecutive batch-sized windows.
    pub fn windows(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        split_window(start, end, self.batch_days())
    }

    async fn raw_page(&self, query: &FetchQuery, cursor: &PageCursor) -> Result<VendorPage> {
        match self {
            VendorAdapter::Airbus(a) => a.search(query, cursor).await,
            VendorAdapter::BlackSky(a) => a.search(query, cursor).await,
            VendorAdapter::Capella(a) => a.search(query, cursor).await,
            VendorAdapter::Maxar(a) => a.search(query, cursor).await,
            VendorAdapter::Planet(a) => a.search(query, cursor).await,
            VendorAdapter::SkyFi(a) => a.search(query, cursor).await,
        }
    }

    /// Fetches one page and normalizes its items. Item-level failures are
    /// returned alongside the good records; request failures are errors.
    pub async fn fetch_page(&self, query: &FetchQuery, cursor: &PageCursor) -> Result<FetchedPage> {
        let page = self.raw_page(query, cursor).await?;
        let next = match self {
            VendorAdapter::Planet(_) => page
                .next_link
                .as_deref()
                .map(|link| PageCursor::Link(self.endpoint().resolve_link(link))),
            _ => self.endpoint().next_numbered(cursor, &page),
        };
        // A vendor echoing back the same link would page forever.
        let next = next.filter(|next| next != cursor);
        Ok(FetchedPage {
            records: satcat_vendors::normalize_page(self.vendor(), &page),
            next,
        })
    }

    /// Every record in the window, page after page.
    pub fn fetch(
        &self,
        query: FetchQuery,
    ) -> BoxStream<'_, Result<std::result::Result<CanonicalRecord, NormalizeError>>> {
        stream::try_unfold(Some(PageCursor::First), move |cursor| {
            let query = query.clone();
            async move {
                let Some(cursor) = cursor else {
                    return Ok::<_, CatalogError>(None);
                };
                let page = self.fetch_page(&query, &cursor).await?;
                let records = stream::iter(page.records.into_iter().map(Ok::<_, CatalogError>));
                Ok(Some((records, page.next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    pub async fn fetch_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<std::result::Result<CanonicalRecord, NormalizeError>>> {
        let vendor = self.vendor();
        let mut items: Vec<Value> = Vec::with_capacity(ids.len());
        for id in ids {
            let found = match self {
                VendorAdapter::Airbus(a) => a.items(id).await?,
                VendorAdapter::BlackSky(a) => a.items(id).await?,
                VendorAdapter::Capella(a) => a.items(id).await?,
                VendorAdapter::Maxar(a) => a.items(id).await?,
                VendorAdapter::Planet(a) => a.items(id).await?,
                VendorAdapter::SkyFi(a) => a.items(id).await?,
            };
            if found.is_empty() {
                warn!(vendor = %vendor, id = %id, "vendor returned no item for id");
            }
            items.extend(found);
        }
        Ok(items
            .iter()
            .map(|item| satcat_vendors::normalize_item(vendor, item))
            .collect())
    }

    pub async fn fetch_thumbnail(&self, vendor_id: &str) -> Result<Bytes> {
        match self {
            VendorAdapter::Airbus(a) => a.thumbnail(vendor_id).await,
            VendorAdapter::BlackSky(a) => a.thumbnail(vendor_id).await,
            VendorAdapter::Capella(a) => a.thumbnail(vendor_id).await,
            VendorAdapter::Maxar(a) => a.thumbnail(vendor_id).await,
            VendorAdapter::Planet(a) => a.thumbnail(vendor_id).await,
            VendorAdapter::SkyFi(a) => a.thumbnail(vendor_id).await,
        }
    }
}

pub fn default_api_url(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::Airbus => airbus::DEFAULT_API_URL,
        Vendor::BlackSky => blacksky::DEFAULT_API_URL,
        Vendor::Capella => capella::DEFAULT_API_URL,
        Vendor::Maxar => maxar::DEFAULT_API_URL,
        Vendor::Planet => planet::DEFAULT_API_URL,
        Vendor::SkyFi => skyfi::DEFAULT_API_URL,
    }
}

fn auth_scheme(vendor: Vendor, settings: &VendorSettings) -> Option<AuthScheme> {
    let api_key = settings.api_key.clone();
    match vendor {
        Vendor::Airbus => api_key.map(|api_key| {
            AuthScheme::TokenExchange(TokenExchange::ApiKey {
                url: settings
                    .auth_url
                    .clone()
                    .unwrap_or_else(|| airbus::DEFAULT_AUTH_URL.to_string()),
                api_key,
            })
        }),
        Vendor::Capella => match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => Some(AuthScheme::TokenExchange(TokenExchange::Basic {
                url: settings
                    .auth_url
                    .clone()
                    .unwrap_or_else(|| capella::DEFAULT_AUTH_URL.to_string()),
                username: username.clone(),
                password: password.clone(),
            })),
            _ => None,
        },
        Vendor::Planet => api_key.map(|key| AuthScheme::Basic {
            username: key,
            password: None,
        }),
        Vendor::Maxar => api_key.map(|value| AuthScheme::Header {
            name: "MAXAR-API-KEY",
            value,
        }),
        Vendor::BlackSky => api_key.map(|value| AuthScheme::Header {
            name: "Authorization",
            value,
        }),
        Vendor::SkyFi => api_key.map(|value| AuthScheme::Header {
            name: "X-Skyfi-Api-Key",
            value,
        }),
    }
}

/// Consecutive `[a, b)` windows of at most `batch_days` covering `[start, end)`.
pub fn split_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    batch_days: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = Duration::days(batch_days.max(1));
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + step).min(end);
        windows.push((cursor, next));
        cursor = next;
    }
    windows
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn windows_split_on_batch_boundaries() {
        let windows = split_window(utc(2024, 1, 1), utc(2024, 3, 1), 28);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], (utc(2024, 1, 1), utc(2024, 1, 29)));
        assert_eq!(windows[2].1, utc(2024, 3, 1));
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn empty_range_has_no_windows() {
        assert!(split_window(utc(2024, 1, 1), utc(2024, 1, 1), 1).is_empty());
    }

    #[test]
    fn missing_credentials_skip_vendor() {
        let settings = VendorSettings::default();
        let adapter = VendorAdapter::from_config(Vendor::Maxar, &settings, &HttpSettings::default()).unwrap();
        assert!(adapter.is_none());

        let capella_half = VendorSettings {
            username: Some("ops".into()),
            ..VendorSettings::default()
        };
        assert!(auth_scheme(Vendor::Capella, &capella_half).is_none());
    }

    #[test]
    fn numbered_paging_stops_on_short_page() {
        let settings = VendorSettings {
            api_key: Some("key".into()),
            page_size: Some(2),
            ..VendorSettings::default()
        };
        let adapter = VendorAdapter::from_config(Vendor::Maxar, &settings, &HttpSettings::default())
            .unwrap()
            .unwrap();
        let endpoint = adapter.endpoint();

        let full = VendorPage {
            items: vec![json!({}), json!({})],
            next_link: None,
            total: None,
        };
        assert_eq!(endpoint.next_numbered(&PageCursor::First, &full), Some(PageCursor::Page(2)));

        let capped = VendorPage { total: Some(4), ..full.clone() };
        assert_eq!(endpoint.next_numbered(&PageCursor::Page(2), &capped), None);

        let short = VendorPage {
            items: vec![json!({})],
            next_link: None,
            total: None,
        };
        assert_eq!(endpoint.next_numbered(&PageCursor::Page(3), &short), None);
    }

    #[test]
    fn relative_links_join_api_root() {
        let settings = VendorSettings {
            api_key: Some("key".into()),
            api_url: Some("http://localhost:9000/".into()),
            ..VendorSettings::default()
        };
        let adapter = VendorAdapter::from_config(Vendor::SkyFi, &settings, &HttpSettings::default())
            .unwrap()
            .unwrap();
        assert_eq!(
            adapter.endpoint().resolve_link("/platform-api/archives?page=2"),
            "http://localhost:9000/platform-api/archives?page=2"
        );
        assert_eq!(adapter.endpoint().resolve_link("https://x.test/a"), "https://x.test/a");
    }
}
