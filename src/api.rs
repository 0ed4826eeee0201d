//! HTTP API handlers for Atmos.
//!
//! Thin mapping between HTTP and the [`Engine`]. Reads never fail because of
//! engine state; location changes fail fast with a descriptive message.
//!
//! Every JSON body carries a `success` flag. Errors are rendered by
//! [`AtmosError`]'s `IntoResponse` impl as `{"success": false, "error": "..."}`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::data_sources::EonetClient;
use crate::engine::{CycleOutcome, Engine};
use crate::error::{AtmosError, Result};
use crate::model::{AuxData, Location, LocationQuery, LocationRequest, SafetyLimits, Snapshot};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub satellite: EonetClient,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/full-data", get(get_full_data))
        .route("/api/air-quality", get(get_air_quality))
        .route(
            "/api/air-quality/location",
            get(get_location).post(post_location),
        )
        .route("/api/air-quality/coordinates", get(get_coordinates))
        .route("/api/air-quality/limits", get(get_limits))
        .route("/api/health", get(health_check))
        .route("/api/satellite", get(get_satellite))
        .route("/api/current-location", get(get_current_location))
        .route("/forecast", get(get_forecast))
        .route("/locate", get(locate_by_query).post(post_location))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FullDataResponse {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub data: FullData,
}

#[derive(Debug, Serialize)]
pub struct FullData {
    pub air_quality: Snapshot,
    pub location: Option<Location>,
    pub limits: SafetyLimits,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub success: bool,
    pub data: Snapshot,
}

#[derive(Debug, Serialize)]
pub struct LocationResponse {
    pub success: bool,
    pub location: Option<Location>,
}

#[derive(Debug, Serialize)]
pub struct LocationChangedResponse {
    pub success: bool,
    pub message: &'static str,
    pub location: Location,
}

#[derive(Debug, Serialize)]
pub struct CoordinatesResponse {
    pub success: bool,
    pub coordinates: Location,
}

#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    pub success: bool,
    pub limits: SafetyLimits,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SatelliteResponse {
    pub success: bool,
    pub data: AuxData,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/full-data - Refresh, then return snapshot, location and limits.
///
/// Concurrent callers share one fresh cycle rather than each fetching. A
/// failed refresh still answers with whatever snapshot is current.
#[instrument(skip(state))]
pub async fn get_full_data(State(state): State<AppState>) -> Json<FullDataResponse> {
    match state.engine.force_update_cycle().await {
        CycleOutcome::Failed(e) => warn!(error = %e, "Refresh failed, serving current snapshot"),
        _ => info!("Full data refreshed"),
    }

    Json(FullDataResponse {
        success: true,
        timestamp: Utc::now(),
        data: FullData {
            air_quality: (*state.engine.snapshot()).clone(),
            location: state.engine.location(),
            limits: state.engine.limits(),
            status: "online",
        },
    })
}

/// GET /api/air-quality - Current snapshot.
pub async fn get_air_quality(State(state): State<AppState>) -> Json<SnapshotResponse> {
    Json(SnapshotResponse {
        success: true,
        data: (*state.engine.snapshot()).clone(),
    })
}

/// GET /forecast - Current snapshot without the envelope.
pub async fn get_forecast(State(state): State<AppState>) -> Json<Snapshot> {
    Json((*state.engine.snapshot()).clone())
}

/// GET /api/air-quality/location - Current location.
pub async fn get_location(State(state): State<AppState>) -> Json<LocationResponse> {
    Json(LocationResponse {
        success: true,
        location: state.engine.location(),
    })
}

/// GET /api/current-location - Current location without the envelope.
///
/// Answers 400 until a location has been set or detected.
pub async fn get_current_location(State(state): State<AppState>) -> Result<Json<Location>> {
    state.engine.location().map(Json).ok_or_else(|| {
        AtmosError::InvalidInput(
            "Location not detected yet. Wait a few seconds and try again.".to_string(),
        )
    })
}

/// POST /api/air-quality/location - Change the location and refresh.
///
/// # Request Body
///
/// ```json
/// { "location": "Sorocaba, SP" }
/// ```
#[instrument(skip(state))]
pub async fn post_location(
    State(state): State<AppState>,
    Json(request): Json<LocationRequest>,
) -> Result<Json<LocationChangedResponse>> {
    change_location(&state, request.location.as_deref().unwrap_or_default()).await
}

/// GET /locate?location=... - Change the location and refresh.
#[instrument(skip(state))]
pub async fn locate_by_query(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<LocationChangedResponse>> {
    change_location(&state, query.location.as_deref().unwrap_or_default()).await
}

async fn change_location(state: &AppState, name: &str) -> Result<Json<LocationChangedResponse>> {
    match state.engine.set_location(name).await {
        Ok(location) => Ok(Json(LocationChangedResponse {
            success: true,
            message: "Location updated successfully",
            location,
        })),
        Err(e) => {
            warn!(query = %name, error = %e, "Location change rejected");
            Err(e)
        }
    }
}

/// GET /api/air-quality/coordinates?location=... - Geocode without changing state.
#[instrument(skip(state))]
pub async fn get_coordinates(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<CoordinatesResponse>> {
    let name = query.location.as_deref().unwrap_or_default();
    let coordinates = state.engine.resolve_location(name).await?;
    Ok(Json(CoordinatesResponse {
        success: true,
        coordinates,
    }))
}

/// GET /api/air-quality/limits - Safety limits table.
pub async fn get_limits(State(state): State<AppState>) -> Json<LimitsResponse> {
    Json(LimitsResponse {
        success: true,
        limits: state.engine.limits(),
    })
}

/// GET /api/health - Liveness check.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            success: true,
            status: "online",
            timestamp: Utc::now(),
        }),
    )
}

/// GET /api/satellite - Dust and wildfire events near the current location.
///
/// Best-effort side channel, independent of the snapshot.
#[instrument(skip(state))]
pub async fn get_satellite(State(state): State<AppState>) -> Result<Json<SatelliteResponse>> {
    let location = state.engine.location().ok_or_else(|| {
        AtmosError::InvalidInput(
            "Location not set yet. Wait a few seconds and try again.".to_string(),
        )
    })?;

    match state
        .satellite
        .aux_data(location.latitude, location.longitude)
        .await
    {
        Ok(data) => Ok(Json(SatelliteResponse {
            success: true,
            data,
        })),
        Err(e) => {
            warn!(location = %location.name, error = %e, "Failed to fetch satellite data");
            Err(e)
        }
    }
}
