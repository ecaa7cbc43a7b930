use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use satcat_vendors::Vendor;
use serde::Deserialize;

use crate::error::{CatalogError, Result};

/// Environment variable naming an optional TOML file loaded before the env overlay.
pub const CONFIG_PATH_ENV: &str = "SATCAT_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub ingestion: IngestionSettings,
    pub http: HttpSettings,
    pub vendors: VendorsConfig,
    pub object_store: ObjectStoreSettings,
    pub geocoder: GeocoderSettings,
    pub address: AddressSettings,
    pub notifications: NotificationSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub concurrency: usize,
    pub window_timeout_secs: u64,
    pub pass_timeout_secs: u64,
    pub thumbnail_concurrency: usize,
    pub backfill_days: i64,
    /// Optional WKT polygon restricting every vendor search.
    pub region_wkt: Option<String>,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            window_timeout_secs: 600,
            pass_timeout_secs: 3600,
            thumbnail_concurrency: 5,
            backfill_days: 35,
            region_wkt: None,
        }
    }
}

impl IngestionSettings {
    pub fn window_timeout(&self) -> Duration {
        Duration::from_secs(self.window_timeout_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_url: Option<String>,
    pub auth_url: Option<String>,
    pub epoch: Option<DateTime<Utc>>,
    pub batch_days: Option<i64>,
    pub page_size: Option<u32>,
    pub max_retries: Option<u32>,
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            username: None,
            password: None,
            api_url: None,
            auth_url: None,
            epoch: None,
            batch_days: None,
            page_size: None,
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VendorsConfig {
    pub airbus: VendorSettings,
    pub blacksky: VendorSettings,
    pub capella: VendorSettings,
    pub maxar: VendorSettings,
    pub planet: VendorSettings,
    pub skyfi: VendorSettings,
}

impl VendorsConfig {
    pub fn get(&self, vendor: Vendor) -> &VendorSettings {
        match vendor {
            Vendor::Airbus => &self.airbus,
            Vendor::BlackSky => &self.blacksky,
            Vendor::Capella => &self.capella,
            Vendor::Maxar => &self.maxar,
            Vendor::Planet => &self.planet,
            Vendor::SkyFi => &self.skyfi,
        }
    }

    pub fn get_mut(&mut self, vendor: Vendor) -> &mut VendorSettings {
        match vendor {
            Vendor::Airbus => &mut self.airbus,
            Vendor::BlackSky => &mut self.blacksky,
            Vendor::Capella => &mut self.capella,
            Vendor::Maxar => &mut self.maxar,
            Vendor::Planet => &mut self.planet,
            Vendor::SkyFi => &mut self.skyfi,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObjectStoreSettings {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeocoderSettings {
    pub states_path: Option<PathBuf>,
    pub marine_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AddressSettings {
    pub api_key: Option<String>,
    pub api_url: String,
}

impl Default for AddressSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://maps.googleapis.com/maps/api/geocode/json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub interval_secs: u64,
    pub bus_buffer: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            bus_buffer: 64,
        }
    }
}

impl NotificationSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub max_db_connections: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            max_db_connections: 10,
        }
    }
}

impl AppConfig {
    /// Reads the optional TOML file named by `SATCAT_CONFIG`, then overlays the
    /// process environment. Callers load `.env` through `dotenvy` first.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            CatalogError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| CatalogError::Config(err.to_string()))
    }

    /// Overlays values from `lookup`. Environment always wins over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get("DATABASE_URL").or_else(|| get("SATCAT_DATABASE_URL")) {
            self.database_url = Some(url);
        }

        let vendors = &mut self.vendors;
        if let Some(key) = get("AIRBUS_API_KEY") {
            vendors.airbus.api_key = Some(key);
        }
        if let Some(token) = get("BLACKSKY_API_TOKEN") {
            vendors.blacksky.api_key = Some(token);
        }
        if let Some(key) = get("PLANET_API_KEY") {
            vendors.planet.api_key = Some(key);
        }
        if let Some(key) = get("MAXAR_API_KEY") {
            vendors.maxar.api_key = Some(key);
        }
        if let Some(user) = get("CAPELLA_USERNAME") {
            vendors.capella.username = Some(user);
        }
        if let Some(pass) = get("CAPELLA_PASSWORD") {
            vendors.capella.password = Some(pass);
        }
        if let Some(key) = get("SKYFI_API_KEY") {
            vendors.skyfi.api_key = Some(key);
        }

        let store = &mut self.object_store;
        for (key, slot) in [
            ("S3_BUCKET", &mut store.bucket),
            ("S3_REGION", &mut store.region),
            ("S3_ENDPOINT_URL", &mut store.endpoint_url),
            ("S3_ACCESS_KEY_ID", &mut store.access_key_id),
            ("S3_SECRET_ACCESS_KEY", &mut store.secret_access_key),
            ("S3_PUBLIC_BASE_URL", &mut store.public_base_url),
        ] {
            if let Some(value) = get(key) {
                *slot = Some(value);
            }
        }

        if let Some(path) = get("GEOCODER_STATES_PATH") {
            self.geocoder.states_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("GEOCODER_MARINE_PATH") {
            self.geocoder.marine_path = Some(PathBuf::from(path));
        }
        if let Some(key) = get("GEOCODING_API_KEY") {
            self.address.api_key = Some(key);
        }
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| CatalogError::Config("DATABASE_URL is not set".into()))
    }

    pub fn vendor(&self, vendor: Vendor) -> &VendorSettings {
        self.vendors.get(vendor)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.ingestion.concurrency, 5);
        assert_eq!(config.ingestion.thumbnail_concurrency, 5);
        assert_eq!(config.ingestion.window_timeout(), Duration::from_secs(600));
        assert_eq!(config.ingestion.pass_timeout(), Duration::from_secs(3600));
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.http.max_retries, 5);
        assert_eq!(config.notifications.bus_buffer, 64);
        assert!(config.vendor(Vendor::Planet).enabled);
        assert!(config.database_url().is_err());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            database_url = "postgres://localhost/satcat"

            [ingestion]
            concurrency = 2

            [vendors.capella]
            api_url = "http://127.0.0.1:9000"
            epoch = "2023-01-01T00:00:00Z"
            batch_days = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.database_url().unwrap(), "postgres://localhost/satcat");
        assert_eq!(config.ingestion.concurrency, 2);
        assert_eq!(config.ingestion.backfill_days, 35);
        let capella = config.vendor(Vendor::Capella);
        assert_eq!(capella.api_url.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(capella.batch_days, Some(3));
        assert_eq!(capella.epoch.unwrap().to_rfc3339(), "2023-01-01T00:00:00+00:00");
    }

    #[test]
    fn environment_overlays_credentials_and_database_fallback() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SATCAT_DATABASE_URL", "postgres://fallback/db"),
            ("CAPELLA_USERNAME", "sar-user"),
            ("CAPELLA_PASSWORD", "secret"),
            ("PLANET_API_KEY", "pl-key"),
            ("S3_BUCKET", "thumbs"),
            ("MAXAR_API_KEY", "   "),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.database_url().unwrap(), "postgres://fallback/db");
        assert_eq!(config.vendor(Vendor::Capella).username.as_deref(), Some("sar-user"));
        assert_eq!(config.vendor(Vendor::Planet).api_key.as_deref(), Some("pl-key"));
        assert_eq!(config.object_store.bucket.as_deref(), Some("thumbs"));
        assert!(config.vendor(Vendor::Maxar).api_key.is_none());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = AppConfig::from_toml_str("ingestion = 3").unwrap_err();
        assert!(matches!(err, CatalogError::Config(_)));
    }
}
