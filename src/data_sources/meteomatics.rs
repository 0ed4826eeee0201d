//! Meteomatics weather API client.
//!
//! Fetches hourly air-quality and humidity series for the next 12 hours at a
//! single coordinate.
//!
//! # API Reference
//!
//! See: <https://www.meteomatics.com/en/api/getting-started/>

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ReadingsSource;
use crate::error::{AtmosError, Result};
use crate::model::{Location, RawReadings, Sample};

/// Base URL for the Meteomatics API.
const METEOMATICS_API_BASE: &str = "https://api.meteomatics.com";

/// Parameters requested on every fetch. PM2.5, NO2, O3 and CO in µg/m³,
/// relative humidity in %.
const PARAMETERS: [&str; 5] = [
    "pm2p5:ugm3",
    "no2:ugm3",
    "o3:ugm3",
    "co:ugm3",
    "relative_humidity_2m:p",
];

/// How far ahead the hourly series reaches.
const HORIZON_HOURS: i64 = 12;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for the Meteomatics time-series endpoint.
#[derive(Clone)]
pub struct MeteomaticsClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl MeteomaticsClient {
    /// Create a new client with basic-auth credentials.
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_base_url(METEOMATICS_API_BASE, username, password)
    }

    /// Create a new client with a custom base URL (for testing).
    pub fn with_base_url(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Build the request URL for a location and time range.
    pub fn series_url(&self, location: &Location, from: DateTime<Utc>) -> String {
        let until = from + chrono::Duration::hours(HORIZON_HOURS);
        format!(
            "{}/{}--{}:PT1H/{}/{},{}/json?model=mix",
            self.base_url,
            from.to_rfc3339_opts(SecondsFormat::Secs, true),
            until.to_rfc3339_opts(SecondsFormat::Secs, true),
            PARAMETERS.join(","),
            location.latitude,
            location.longitude
        )
    }

    /// Fetch the raw API response for a location.
    pub async fn get_series(&self, location: &Location) -> Result<MeteomaticsResponse> {
        let url = self.series_url(location, Utc::now());
        debug!(url = %url, "Requesting Meteomatics series");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let data = response.json::<MeteomaticsResponse>().await?;
        Ok(data)
    }
}

#[async_trait]
impl ReadingsSource for MeteomaticsClient {
    async fn fetch(&self, location: &Location) -> Result<RawReadings> {
        info!(location = %location.name, "Fetching Meteomatics data");
        let response = self.get_series(location).await?;
        let raw = response.into_readings();
        if raw.is_empty() {
            return Err(AtmosError::NoData);
        }
        Ok(raw)
    }
}

// ============================================================================
// Response types
// ============================================================================

/// Response from the Meteomatics JSON endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteomaticsResponse {
    #[serde(default)]
    pub status: String,

    /// One entry per requested parameter.
    #[serde(default)]
    pub data: Vec<MeteomaticsParameter>,
}

/// Series for one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteomaticsParameter {
    /// Parameter name as requested, e.g. "pm2p5:ugm3".
    pub parameter: String,

    #[serde(default)]
    pub coordinates: Vec<MeteomaticsCoordinate>,
}

/// Values at one coordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteomaticsCoordinate {
    #[serde(default)]
    pub lat: f64,

    #[serde(default)]
    pub lon: f64,

    #[serde(default)]
    pub dates: Vec<MeteomaticsValue>,
}

/// A single timestamped value. Missing values come back as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteomaticsValue {
    pub date: DateTime<Utc>,
    pub value: Option<f64>,
}

impl MeteomaticsResponse {
    /// Map the response into readings, keeping the API's order.
    ///
    /// Only the first coordinate is used. Unknown parameters and null values
    /// are dropped.
    pub fn into_readings(self) -> RawReadings {
        let mut raw = RawReadings::default();
        for parameter in self.data {
            let Some(coordinate) = parameter.coordinates.into_iter().next() else {
                continue;
            };
            let series: Vec<Sample> = coordinate
                .dates
                .into_iter()
                .filter_map(|d| d.value.map(|v| Sample::new(d.date, v)))
                .collect();

            if !raw.insert_parameter(&parameter.parameter, series) {
                debug!(parameter = %parameter.parameter, "Ignoring unrecognized parameter");
            }
        }
        raw
    }
}
