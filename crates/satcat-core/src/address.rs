//! `(lat, lon) -> address` lookups used to decorate analytics responses.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::{AddressSettings, HttpSettings};
use crate::error::{CatalogError, Result};

#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, lat: f64, lon: f64) -> Result<Option<String>>;
}

/// Resolver used when no geocoding key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAddress;

#[async_trait]
impl AddressResolver for NoAddress {
    async fn resolve(&self, _lat: f64, _lon: f64) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Google reverse geocoding.
pub struct GoogleGeocoder {
    client: Client,
    api_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
}

impl GoogleGeocoder {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, http: &HttpSettings) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(http.timeout()).build()?,
            api_url: api_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl AddressResolver for GoogleGeocoder {
    async fn resolve(&self, lat: f64, lon: f64) -> Result<Option<String>> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("latlng", format!("{lat},{lon}")), ("key", self.api_key.clone())])
            .send()
            .await
            .map_err(|err| CatalogError::ExternalService(format!("address lookup failed: {err}")))?;
        if !response.status().is_success() {
            return Err(CatalogError::ExternalService(format!(
                "address lookup returned {}",
                response.status().as_u16()
            )));
        }
        let body: GeocodeResponse = response
            .json()
            .await
            .map_err(|err| CatalogError::ExternalService(format!("malformed address response: {err}")))?;
        match body.status.as_str() {
            "OK" => Ok(body.results.into_iter().next().map(|r| r.formatted_address)),
            "ZERO_RESULTS" => Ok(None),
            other => Err(CatalogError::ExternalService(format!(
                "address lookup status {other}: {}",
                body.error_message.unwrap_or_default()
            ))),
        }
    }
}

/// Google when a key is configured, otherwise [`NoAddress`].
pub fn resolver_from_settings(settings: &AddressSettings, http: &HttpSettings) -> Result<Arc<dyn AddressResolver>> {
    match &settings.api_key {
        Some(key) => Ok(Arc::new(GoogleGeocoder::new(settings.api_url.clone(), key.clone(), http)?)),
        None => Ok(Arc::new(NoAddress)),
    }
}
