//! NASA EONET (Earth Observatory Natural Event Tracker) client.
//!
//! Supplies the satellite side channel: open dust/haze and wildfire events
//! around the current location. This is informational only and never feeds
//! the alert computation.
//!
//! # API Reference
//!
//! See: <https://eonet.gsfc.nasa.gov/docs/v3>

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::model::{AuxData, SatelliteEvents};

/// Base URL for the EONET v3 API.
const EONET_API_BASE: &str = "https://eonet.gsfc.nasa.gov/api/v3";

/// Half-width of the search box around the location, in degrees.
const SEARCH_RADIUS_DEG: f64 = 2.0;

const CATEGORY_DUST: &str = "dustHaze";
const CATEGORY_WILDFIRES: &str = "wildfires";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for EONET event queries.
#[derive(Clone)]
pub struct EonetClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for EonetClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EonetClient {
    pub fn new() -> Self {
        Self::with_base_url(EONET_API_BASE)
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the events URL for a box around `(lat, lon)`.
    ///
    /// EONET expects the box as `min_lon,max_lat,max_lon,min_lat`.
    pub fn events_url(&self, lat: f64, lon: f64) -> String {
        let min_lat = (lat - SEARCH_RADIUS_DEG).max(-90.0);
        let max_lat = (lat + SEARCH_RADIUS_DEG).min(90.0);
        let min_lon = (lon - SEARCH_RADIUS_DEG).max(-180.0);
        let max_lon = (lon + SEARCH_RADIUS_DEG).min(180.0);

        format!(
            "{}/events?status=open&category={},{}&bbox={},{},{},{}",
            self.base_url, CATEGORY_DUST, CATEGORY_WILDFIRES, min_lon, max_lat, max_lon, min_lat
        )
    }

    /// Fetch open events near a point.
    pub async fn get_events(&self, lat: f64, lon: f64) -> Result<EonetEventsResponse> {
        let url = self.events_url(lat, lon);
        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let data = response.json::<EonetEventsResponse>().await?;
        Ok(data)
    }

    /// Dust and wildfire activity near a point.
    pub async fn aux_data(&self, lat: f64, lon: f64) -> Result<AuxData> {
        let events = self.get_events(lat, lon).await?;
        let aux = events.into_aux_data();
        info!(
            airdust = aux.airdust.count,
            wildfire = aux.wildfire.count,
            "Satellite events fetched"
        );
        Ok(aux)
    }
}

// ============================================================================
// Response types
// ============================================================================

/// Response from the EONET events endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EonetEventsResponse {
    #[serde(default)]
    pub events: Vec<EonetEvent>,
}

/// A single natural event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EonetEvent {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub categories: Vec<EonetCategory>,
}

/// Category tag of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EonetCategory {
    pub id: String,

    #[serde(default)]
    pub title: String,
}

impl EonetEvent {
    fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c.id == category)
    }
}

impl EonetEventsResponse {
    /// Split the events into the dust and wildfire channels.
    pub fn into_aux_data(self) -> AuxData {
        let collect = |category: &str| {
            let titles: Vec<String> = self
                .events
                .iter()
                .filter(|e| e.has_category(category))
                .map(|e| e.title.clone())
                .collect();
            SatelliteEvents {
                active: !titles.is_empty(),
                count: titles.len(),
                titles,
            }
        };

        AuxData {
            airdust: collect(CATEGORY_DUST),
            wildfire: collect(CATEGORY_WILDFIRES),
        }
    }
}
