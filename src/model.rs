//! Data models for Atmos.
//!
//! Everything the engine produces or consumes lives here: pollutant kinds and
//! their limits, raw readings as delivered by a data source, per-pollutant
//! forecasts, and the immutable [`Snapshot`] published after each update cycle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lower bound of the comfortable relative humidity range (%).
pub const HUMIDITY_MIN: f64 = 40.0;

/// Upper bound of the comfortable relative humidity range (%).
pub const HUMIDITY_MAX: f64 = 60.0;

/// Humidity assumed when no reading is available.
pub const DEFAULT_HUMIDITY: f64 = 50.0;

/// A regulated pollutant tracked by the engine.
///
/// The declaration order is the iteration order used everywhere, and it
/// decides ties when two pollutants forecast the same breach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PollutantKind {
    #[serde(rename = "PM25")]
    Pm25,
    #[serde(rename = "NO2")]
    No2,
    #[serde(rename = "O3")]
    O3,
    #[serde(rename = "CO")]
    Co,
}

impl PollutantKind {
    /// All pollutants in evaluation order.
    pub const ALL: [PollutantKind; 4] = [
        PollutantKind::Pm25,
        PollutantKind::No2,
        PollutantKind::O3,
        PollutantKind::Co,
    ];

    /// Safety limit for this pollutant.
    ///
    /// PM2.5, NO2 and O3 are in µg/m³; CO is in the unit delivered by the source.
    pub fn limit(&self) -> f64 {
        match self {
            PollutantKind::Pm25 => 15.0,
            PollutantKind::No2 => 200.0,
            PollutantKind::O3 => 180.0,
            PollutantKind::Co => 10.0,
        }
    }

    /// Weight of this pollutant in the composite air-quality index.
    pub fn aqi_weight(&self) -> f64 {
        match self {
            PollutantKind::Pm25 => 30.0,
            PollutantKind::No2 => 25.0,
            PollutantKind::O3 => 25.0,
            PollutantKind::Co => 20.0,
        }
    }

    /// Short label used in messages and JSON keys.
    pub fn label(&self) -> &'static str {
        match self {
            PollutantKind::Pm25 => "PM25",
            PollutantKind::No2 => "NO2",
            PollutantKind::O3 => "O3",
            PollutantKind::Co => "CO",
        }
    }
}

impl fmt::Display for PollutantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The read-only table of safety limits exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SafetyLimits {
    #[serde(rename = "PM25")]
    pub pm25: f64,
    #[serde(rename = "NO2")]
    pub no2: f64,
    #[serde(rename = "O3")]
    pub o3: f64,
    #[serde(rename = "CO")]
    pub co: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

/// The process-wide limits table.
pub const SAFETY_LIMITS: SafetyLimits = SafetyLimits {
    pm25: 15.0,
    no2: 200.0,
    o3: 180.0,
    co: 10.0,
    humidity_min: HUMIDITY_MIN,
    humidity_max: HUMIDITY_MAX,
};

/// One timestamped reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Ordered readings for one signal. Index 0 is the current value.
pub type PollutantSeries = Vec<Sample>;

/// Everything one ingestion produced, already mapped to known signals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReadings {
    pub pollutants: BTreeMap<PollutantKind, PollutantSeries>,
    pub humidity: Option<PollutantSeries>,
}

/// A signal recognized from a source-specific parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Pollutant(PollutantKind),
    Humidity,
}

impl Signal {
    /// Map an external parameter name (e.g. `pm2p5:ugm3`) to a known signal.
    ///
    /// Checks run in a fixed order, so `co` is only tried after the more
    /// specific names. Unknown parameters map to `None` and are dropped.
    pub fn from_parameter(name: &str) -> Option<Self> {
        if name.contains("pm2p5") || name.contains("PM2.5") {
            Some(Signal::Pollutant(PollutantKind::Pm25))
        } else if name.contains("no2") || name.contains("NO2") {
            Some(Signal::Pollutant(PollutantKind::No2))
        } else if name.contains("o3") || name.contains("O3") {
            Some(Signal::Pollutant(PollutantKind::O3))
        } else if name.contains("co") || name.contains("CO") {
            Some(Signal::Pollutant(PollutantKind::Co))
        } else if name.contains("relative_humidity") {
            Some(Signal::Humidity)
        } else {
            None
        }
    }
}

impl RawReadings {
    /// Store a series under the signal its parameter name maps to.
    ///
    /// Returns `false` when the parameter is not recognized.
    pub fn insert_parameter(&mut self, parameter: &str, series: PollutantSeries) -> bool {
        match Signal::from_parameter(parameter) {
            Some(Signal::Pollutant(kind)) => {
                self.pollutants.insert(kind, series);
                true
            }
            Some(Signal::Humidity) => {
                self.humidity = Some(series);
                true
            }
            None => false,
        }
    }

    /// True if no recognized signal was ingested at all.
    pub fn is_empty(&self) -> bool {
        self.pollutants.is_empty() && self.humidity.is_none()
    }

    /// Series for a pollutant, if present and non-empty.
    pub fn series(&self, kind: PollutantKind) -> Option<&[Sample]> {
        self.pollutants
            .get(&kind)
            .map(Vec::as_slice)
            .filter(|s| !s.is_empty())
    }

    /// Current value of a pollutant (0 when missing).
    pub fn current(&self, kind: PollutantKind) -> f64 {
        self.series(kind).map(|s| s[0].value).unwrap_or(0.0)
    }

    /// Current humidity ([`DEFAULT_HUMIDITY`] when missing).
    pub fn current_humidity(&self) -> f64 {
        self.humidity
            .as_deref()
            .and_then(|s| s.first())
            .map(|s| s.value)
            .unwrap_or(DEFAULT_HUMIDITY)
    }
}

/// Slope and intercept of a least-squares line over sample indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendResult {
    pub slope: f64,
    pub intercept: f64,
}

/// Direction of a pollutant's trend, with a ±0.5 dead zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

/// A raw sample as shown in a forecast preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewPoint {
    /// `HH:MM` label of the sample time (UTC).
    pub time: String,
    pub value: f64,
}

/// Forecast for a single pollutant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollutantForecast {
    pub current_value: f64,
    pub limit: f64,
    pub trend: Option<TrendDirection>,
    /// Hours until the limit is reached, rounded to one decimal.
    pub hours_to_breach: Option<f64>,
    pub breach_at: Option<DateTime<Utc>>,
    pub preview: Vec<PreviewPoint>,
}

/// Overall alert level derived from the nearest forecast breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    /// No pollutant is heading toward its limit.
    Good,
    /// Breach more than 12 hours away.
    Low,
    /// Breach within 12 hours.
    Moderate,
    /// Breach within 6 hours.
    High,
    /// Breach within 3 hours.
    Critical,
}

impl AlertLevel {
    /// Ordinal rank; `Good` sits below every real alert.
    pub fn rank(&self) -> i8 {
        match self {
            AlertLevel::Good => -1,
            AlertLevel::Low => 0,
            AlertLevel::Moderate => 1,
            AlertLevel::High => 2,
            AlertLevel::Critical => 3,
        }
    }

    /// Time category sent to devices (0..=3).
    pub fn time_category(&self) -> u8 {
        self.rank().max(0) as u8
    }

    pub fn is_severe(&self) -> bool {
        matches!(self, AlertLevel::High | AlertLevel::Critical)
    }
}

/// How long until the critical pollutant peaks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeToPeak {
    pub hours: Option<u32>,
    pub minutes: Option<u32>,
    pub eta: Option<DateTime<Utc>>,
}

/// Category of the composite index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AqiCategory {
    Good,
    Regular,
    Poor,
    VeryPoor,
}

/// Composite 0..=100 air-quality index (lower is better).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AirQualityIndex {
    pub value: u8,
    pub category: AqiCategory,
}

impl Default for AirQualityIndex {
    fn default() -> Self {
        Self {
            value: 0,
            category: AqiCategory::Good,
        }
    }
}

/// Boolean safety actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    pub close_windows: bool,
    pub run_purifier: bool,
    pub wear_masks: bool,
    pub manage_humidity: bool,
}

/// The published result of one update cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub alert_level: AlertLevel,
    pub time_category: u8,
    pub alert_message: String,
    pub critical_pollutant: Option<PollutantKind>,
    pub time_to_peak: TimeToPeak,
    pub aqi: AirQualityIndex,
    pub current_values: BTreeMap<PollutantKind, f64>,
    pub current_humidity: f64,
    pub forecasts: BTreeMap<PollutantKind, PollutantForecast>,
    pub recommendations: Recommendations,
    pub location: Option<String>,
    /// Set only when no snapshot could ever be built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            alert_level: AlertLevel::Good,
            time_category: 0,
            alert_message: String::new(),
            critical_pollutant: None,
            time_to_peak: TimeToPeak::default(),
            aqi: AirQualityIndex::default(),
            current_values: BTreeMap::new(),
            current_humidity: 0.0,
            forecasts: BTreeMap::new(),
            recommendations: Recommendations::default(),
            location: None,
            error: None,
        }
    }
}

/// The single tracked location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
}

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            city: None,
            region: None,
            country: None,
            source_ip: None,
        }
    }
}

/// Auxiliary satellite observations near the current location.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuxData {
    pub airdust: SatelliteEvents,
    pub wildfire: SatelliteEvents,
}

/// Open events of one category near a point.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SatelliteEvents {
    pub active: bool,
    pub count: usize,
    pub titles: Vec<String>,
}

/// Request body for location changes.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationRequest {
    #[serde(default)]
    pub location: Option<String>,
}

/// Query parameters carrying a location name.
#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    #[serde(default)]
    pub location: Option<String>,
}
