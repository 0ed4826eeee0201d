//! OpenStreetMap Nominatim geocoding client.
//!
//! Free to use without an API key, but the usage policy requires an
//! identifying `User-Agent` and at most one request per second. Lookups only
//! happen on explicit location changes, which stays well inside that.
//!
//! # API Reference
//!
//! See: <https://nominatim.org/release-docs/latest/api/Search/>

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Geocoder;
use crate::error::{AtmosError, Result};
use crate::model::Location;

/// Base URL for the Nominatim API.
const NOMINATIM_API_BASE: &str = "https://nominatim.openstreetmap.org";

const USER_AGENT: &str = "AtmosProject/1.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for Nominatim place search.
#[derive(Clone)]
pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for NominatimClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NominatimClient {
    /// Create a new Nominatim client with default settings.
    pub fn new() -> Self {
        Self::with_base_url(NOMINATIM_API_BASE)
    }

    /// Create a new Nominatim client with a custom base URL (for testing).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Search for places matching a free-form query, best match first.
    pub async fn search(&self, query: &str) -> Result<Vec<NominatimPlace>> {
        let url = format!(
            "{}/search?format=json&q={}&limit=1",
            self.base_url,
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let places = response.json::<Vec<NominatimPlace>>().await?;
        Ok(places)
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn resolve(&self, name: &str) -> Result<Location> {
        let place = self
            .search(name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AtmosError::LocationNotFound(name.to_string()))?;

        let location = place.to_location()?;
        info!(
            query = %name,
            resolved = %location.name,
            latitude = location.latitude,
            longitude = location.longitude,
            "Location resolved"
        );
        Ok(location)
    }
}

// ============================================================================
// Response types
// ============================================================================

/// A single search hit. Nominatim returns coordinates as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NominatimPlace {
    pub display_name: String,
    pub lat: String,
    pub lon: String,
}

impl NominatimPlace {
    /// Convert into a location, parsing the string coordinates.
    pub fn to_location(&self) -> Result<Location> {
        let parse = |raw: &str| {
            raw.trim().parse::<f64>().map_err(|_| {
                AtmosError::UpstreamUnavailable(format!("invalid coordinate from geocoder: {raw}"))
            })
        };
        Ok(Location::new(
            self.display_name.clone(),
            parse(&self.lat)?,
            parse(&self.lon)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_to_location() {
        let places: Vec<NominatimPlace> = serde_json::from_str(
            r#"[{
                "place_id": 1,
                "display_name": "Sorocaba, Região Imediata de Sorocaba, São Paulo, Brasil",
                "lat": "-23.5003451",
                "lon": "-47.4582864"
            }]"#,
        )
        .unwrap();

        let location = places[0].to_location().unwrap();
        assert!(location.name.starts_with("Sorocaba"));
        assert_eq!(location.latitude, -23.5003451);
        assert_eq!(location.longitude, -47.4582864);
        assert!(location.source_ip.is_none());
    }

    #[test]
    fn test_invalid_coordinates() {
        let place = NominatimPlace {
            display_name: "Nowhere".to_string(),
            lat: "north".to_string(),
            lon: "0".to_string(),
        };
        assert!(matches!(
            place.to_location(),
            Err(AtmosError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_search_identifies_project() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n[]",
                )
                .await
                .unwrap();
            String::from_utf8_lossy(&request).to_lowercase()
        });

        let client = NominatimClient::with_base_url(&format!("http://{addr}"));
        let result = client.resolve("Atlantis").await;
        assert!(matches!(result, Err(AtmosError::LocationNotFound(_))));

        let request = server.await.unwrap();
        assert!(request.starts_with("get /search?format=json&q=atlantis&limit=1 "));
        assert!(request.contains("user-agent: atmosproject/1.0\r\n"));
    }
}
