//! Error types for Atmos.
//!
//! Only I/O-facing operations can fail: geocoding, ingestion and the sample
//! store. The analysis pipeline absorbs every edge case as "no forecast".

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Result type for fallible Atmos operations.
pub type Result<T> = std::result::Result<T, AtmosError>;

#[derive(Debug, thiserror::Error)]
pub enum AtmosError {
    /// Geocoding returned no match.
    #[error("Location \"{0}\" not found")]
    LocationNotFound(String),

    /// The data source could not be reached, timed out, or answered badly.
    #[error("Upstream data source unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The fetch succeeded but carried no recognized pollutant series.
    #[error("No valid data received from the data source")]
    NoData,

    /// A request was rejected before any network call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sample store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<reqwest::Error> for AtmosError {
    fn from(err: reqwest::Error) -> Self {
        AtmosError::UpstreamUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for AtmosError {
    fn from(err: std::io::Error) -> Self {
        AtmosError::UpstreamUnavailable(err.to_string())
    }
}

impl AtmosError {
    /// Whether this error should abort an update cycle without touching state.
    pub fn is_ingestion_failure(&self) -> bool {
        matches!(
            self,
            AtmosError::UpstreamUnavailable(_) | AtmosError::NoData
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            AtmosError::InvalidInput(_) | AtmosError::LocationNotFound(_) => {
                StatusCode::BAD_REQUEST
            }
            AtmosError::UpstreamUnavailable(_) | AtmosError::NoData => StatusCode::BAD_GATEWAY,
            AtmosError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AtmosError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
