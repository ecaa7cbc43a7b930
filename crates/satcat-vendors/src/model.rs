use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use geo::Polygon;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::NormalizeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Airbus,
    BlackSky,
    Capella,
    Maxar,
    Planet,
    SkyFi,
}

impl Vendor {
    pub const ALL: [Vendor; 6] = [
        Vendor::Airbus,
        Vendor::BlackSky,
        Vendor::Capella,
        Vendor::Maxar,
        Vendor::Planet,
        Vendor::SkyFi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Airbus => "airbus",
            Vendor::BlackSky => "blacksky",
            Vendor::Capella => "capella",
            Vendor::Maxar => "maxar",
            Vendor::Planet => "planet",
            Vendor::SkyFi => "skyfi",
        }
    }

    /// Synthetic aperture radar vendors never report cloud cover.
    pub fn is_sar(&self) -> bool {
        matches!(self, Vendor::Capella)
    }

    /// Days per request window before a fetch is split into sequential batches.
    pub fn default_batch_days(&self) -> i64 {
        match self {
            Vendor::Capella => 1,
            _ => 28,
        }
    }

    /// First instant an empty cursor resumes from.
    pub fn epoch(&self) -> DateTime<Utc> {
        let (y, m, d) = match self {
            Vendor::Airbus => (2014, 1, 1),
            Vendor::BlackSky => (2019, 1, 1),
            Vendor::Capella => (2020, 12, 1),
            Vendor::Maxar => (2014, 1, 1),
            Vendor::Planet => (2016, 1, 1),
            Vendor::SkyFi => (2020, 1, 1),
        };
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub(crate) fn cloud_scale(&self) -> CloudScale {
        match self {
            Vendor::Planet => CloudScale::Fraction,
            Vendor::Capella => CloudScale::NotApplicable,
            _ => CloudScale::Percent,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "airbus" => Ok(Vendor::Airbus),
            "blacksky" => Ok(Vendor::BlackSky),
            "capella" => Ok(Vendor::Capella),
            "maxar" => Ok(Vendor::Maxar),
            "planet" => Ok(Vendor::Planet),
            "skyfi" => Ok(Vendor::SkyFi),
            other => Err(NormalizeError::UnknownVendor(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloudScale {
    Percent,
    Fraction,
    NotApplicable,
}

/// Vendor-independent capture metadata produced by every normalizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub vendor: Vendor,
    pub vendor_id: String,
    pub acquisition_datetime: DateTime<Utc>,
    pub publication_datetime: Option<DateTime<Utc>>,
    pub footprint: Polygon<f64>,
    /// Percent in `[0, 100]`, `-1` for SAR, `None` when unknown.
    pub cloud_cover: Option<f64>,
    pub gsd: Option<f64>,
    pub off_nadir: Option<f64>,
    pub azimuth_angle: Option<f64>,
    pub illumination_azimuth: Option<f64>,
    pub illumination_elevation: Option<f64>,
    pub sun_elevation: Option<f64>,
    pub constellation: Option<String>,
    pub platform: Option<String>,
    pub sensor: Option<String>,
    pub thumbnail_url: Option<String>,
    pub metadata: Value,
}

impl CanonicalRecord {
    pub fn holdback_seconds(&self) -> Option<i64> {
        self.publication_datetime
            .map(|published| (published - self.acquisition_datetime).num_seconds())
    }

    /// Checks the record-level invariants shared by every vendor.
    pub fn validate(&self) -> Result<(), NormalizeError> {
        if let Some(published) = self.publication_datetime {
            if published < self.acquisition_datetime {
                return Err(self.invalid("publication precedes acquisition"));
            }
        }
        if let Some(cloud) = self.cloud_cover {
            if cloud != -1.0 && !(0.0..=100.0).contains(&cloud) {
                return Err(self.invalid(format!("cloud cover {cloud} out of range")));
            }
        }
        let ring = &self.footprint.exterior().0;
        if ring.len() < 4 || ring.first() != ring.last() {
            return Err(NormalizeError::InvalidGeometry {
                vendor: self.vendor,
                vendor_id: self.vendor_id.clone(),
                message: "footprint ring is not closed".into(),
            });
        }
        Ok(())
    }

    fn invalid(&self, message: impl Into<String>) -> NormalizeError {
        NormalizeError::InvalidRecord {
            vendor: self.vendor,
            vendor_id: self.vendor_id.clone(),
            message: message.into(),
        }
    }
}

/// One page of raw vendor items plus whatever the vendor reports for paging.
#[derive(Debug, Clone, Default)]
pub struct VendorPage {
    pub items: Vec<Value>,
    pub next_link: Option<String>,
    pub total: Option<u64>,
}
