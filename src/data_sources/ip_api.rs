//! IP-based geolocation via ip-api.com.
//!
//! Used once at startup when no location was configured or persisted.
//!
//! # API Reference
//!
//! See: <https://ip-api.com/docs/api:json>

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::LocationDetector;
use crate::error::{AtmosError, Result};
use crate::model::Location;

/// Base URL for the ip-api JSON endpoint. The free tier is HTTP only.
const IP_API_BASE: &str = "http://ip-api.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for ip-api.com.
#[derive(Clone)]
pub struct IpApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for IpApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IpApiClient {
    pub fn new() -> Self {
        Self::with_base_url(IP_API_BASE)
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Look up the caller's public IP.
    pub async fn lookup(&self) -> Result<IpApiResponse> {
        let url = format!("{}/json/", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let data = response.json::<IpApiResponse>().await?;
        Ok(data)
    }
}

#[async_trait]
impl LocationDetector for IpApiClient {
    async fn detect(&self) -> Result<Location> {
        let location = self.lookup().await?.into_location()?;
        info!(location = %location.name, "Location detected from IP");
        Ok(location)
    }
}

// ============================================================================
// Response types
// ============================================================================

/// Response from the ip-api JSON endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpApiResponse {
    /// "success" or "fail".
    pub status: String,

    /// Failure reason when `status` is "fail".
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub country: Option<String>,

    #[serde(default)]
    pub region_name: Option<String>,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub lat: Option<f64>,

    #[serde(default)]
    pub lon: Option<f64>,

    /// The public IP that was looked up.
    #[serde(default)]
    pub query: Option<String>,
}

impl IpApiResponse {
    /// Convert a successful lookup into a location named "city, region, country".
    pub fn into_location(self) -> Result<Location> {
        if self.status != "success" {
            return Err(AtmosError::UpstreamUnavailable(format!(
                "IP geolocation failed: {}",
                self.message.as_deref().unwrap_or("unknown reason")
            )));
        }
        let (Some(lat), Some(lon)) = (self.lat, self.lon) else {
            return Err(AtmosError::UpstreamUnavailable(
                "IP geolocation returned no coordinates".to_string(),
            ));
        };

        let name = [&self.city, &self.region_name, &self.country]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Location {
            name,
            latitude: lat,
            longitude: lon,
            city: self.city,
            region: self.region_name,
            country: self.country,
            source_ip: self.query,
        })
    }
}
