//! External collaborators of the engine.
//!
//! Each client only fetches raw data and maps it into the crate's own types.
//! The engine talks to them through the traits below, which lets tests swap
//! in fakes.
//!
//! # Data Sources
//!
//! - [`meteomatics`]: hourly pollutant and humidity series
//! - [`nominatim`]: place name to coordinates (OpenStreetMap)
//! - [`ip_api`]: approximate location from the public IP
//! - [`eonet`]: NASA EONET dust and wildfire events (best-effort side channel)
//! - [`sensor`]: locally attached serial sensor

pub mod eonet;
pub mod ip_api;
pub mod meteomatics;
pub mod nominatim;
pub mod sensor;

pub use eonet::EonetClient;
pub use ip_api::IpApiClient;
pub use meteomatics::MeteomaticsClient;
pub use nominatim::NominatimClient;
pub use sensor::SensorLink;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Location, RawReadings, Snapshot};

/// Supplies one ingestion worth of readings for a location.
#[async_trait]
pub trait ReadingsSource: Send + Sync {
    async fn fetch(&self, location: &Location) -> Result<RawReadings>;
}

/// Resolves a place name to a location.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Location>;
}

/// Detects the current location without user input.
#[async_trait]
pub trait LocationDetector: Send + Sync {
    async fn detect(&self) -> Result<Location>;
}

/// Receives every freshly published snapshot (e.g. an attached display).
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn publish(&self, snapshot: &Snapshot) -> Result<()>;
}
