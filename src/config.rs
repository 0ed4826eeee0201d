//! Runtime configuration loaded from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::Location;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:atmos.db?mode=rwc";

/// Default interval between update cycles.
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 600;

/// Location used until geocoding or IP detection replaces it.
const DEFAULT_LOCATION_NAME: &str = "São Paulo, SP, Brasil";
const DEFAULT_LATITUDE: f64 = -23.5505;
const DEFAULT_LONGITUDE: f64 = -46.6333;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub update_interval: Duration,
    pub meteomatics_user: String,
    pub meteomatics_password: String,
    /// Explicit location name to geocode at startup. Disables IP detection.
    pub location: Option<String>,
    /// Serial device of a local sensor. When set, the sensor replaces the
    /// weather API as the readings source.
    pub sensor_port: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ATMOS_PORT` | 3000 |
    /// | `ATMOS_DATABASE_URL` | `sqlite:atmos.db?mode=rwc` |
    /// | `ATMOS_UPDATE_INTERVAL_SECS` | 600 |
    /// | `METEOMATICS_USER` / `METEOMATICS_PASS` | empty |
    /// | `ATMOS_LOCATION` | unset |
    /// | `ATMOS_SENSOR_PORT` | unset |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = non_empty("ATMOS_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let update_secs = non_empty("ATMOS_UPDATE_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS);

        Self {
            port,
            database_url: non_empty("ATMOS_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            update_interval: Duration::from_secs(update_secs),
            meteomatics_user: lookup("METEOMATICS_USER").unwrap_or_default(),
            meteomatics_password: lookup("METEOMATICS_PASS").unwrap_or_default(),
            location: non_empty("ATMOS_LOCATION"),
            sensor_port: non_empty("ATMOS_SENSOR_PORT").map(PathBuf::from),
        }
    }
}

/// The location tracked before anything else is known.
pub fn default_location() -> Location {
    Location::new(DEFAULT_LOCATION_NAME, DEFAULT_LATITUDE, DEFAULT_LONGITUDE)
}
