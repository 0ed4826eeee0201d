//! Atmos - Air-quality trend analysis and alerting service.
//!
//! # Overview
//!
//! Every update interval Atmos fetches short-term pollutant forecasts for the
//! tracked location, projects when each pollutant would cross its safety
//! limit, and publishes an alert level, an air-quality index and household
//! recommendations.
//!
//! # API Endpoints
//!
//! - `GET /api/full-data` - Refresh and return snapshot, location and limits
//! - `GET /api/air-quality` - Current snapshot
//! - `GET|POST /api/air-quality/location` - Read or change the location
//! - `GET /api/air-quality/coordinates` - Geocode a place name
//! - `GET /api/air-quality/limits` - Safety limits
//! - `GET /api/satellite` - Dust and wildfire events nearby
//! - `GET /api/health` - Health check
//! - `GET /forecast`, `GET|POST /locate` - Short aliases

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use atmos::api::{AppState, router};
use atmos::config::{Config, default_location};
use atmos::data_sources::{
    EonetClient, IpApiClient, MeteomaticsClient, NominatimClient, ReadingsSource, SensorLink,
};
use atmos::engine::{CycleOutcome, Engine};
use atmos::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("atmos=info".parse()?))
        .init();

    let config = Config::from_env();

    info!(
        port = config.port,
        db_url = %config.database_url,
        interval_secs = config.update_interval.as_secs(),
        "Starting Atmos server"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let geocoder = Arc::new(NominatimClient::new());
    let engine = match &config.sensor_port {
        Some(port) => {
            let sensor =
                Arc::new(SensorLink::open(port).await?.with_max_frame_age(config.update_interval));
            info!("Readings source: serial sensor");
            Engine::new(sensor.clone(), geocoder, storage).with_sink(sensor)
        }
        None => {
            if config.meteomatics_user.is_empty() {
                warn!("METEOMATICS_USER not set, forecast requests will be rejected");
            }
            let source: Arc<dyn ReadingsSource> = Arc::new(MeteomaticsClient::new(
                &config.meteomatics_user,
                &config.meteomatics_password,
            ));
            info!("Readings source: Meteomatics");
            Engine::new(source, geocoder, storage)
        }
    };
    let engine = Arc::new(engine);

    // Startup location: persisted, then configured, then detected, then default.
    if let Err(e) = engine.restore().await {
        warn!(error = %e, "Failed to restore persisted state");
    }

    if let Some(name) = &config.location {
        if let Err(e) = engine.set_location(name).await {
            warn!(location = %name, error = %e, "Configured location could not be resolved");
        }
    }

    if engine.location().is_none() {
        if let Err(e) = engine.detect_location(&IpApiClient::new()).await {
            warn!(error = %e, "Location detection failed, using default location");
            engine.replace_location(default_location()).await;
        }
    }

    // Periodic update cycles; the first tick fires immediately.
    let scheduler = engine.clone();
    let period = config.update_interval;
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match scheduler.run_update_cycle().await {
                CycleOutcome::Updated(snapshot) => info!(
                    alert_level = ?snapshot.alert_level,
                    aqi = snapshot.aqi.value,
                    "Scheduled update complete"
                ),
                CycleOutcome::Skipped | CycleOutcome::Coalesced(_) => {}
                CycleOutcome::Failed(e) => warn!(error = %e, "Scheduled update failed"),
            }
        }
    });

    let state = AppState {
        engine,
        satellite: EonetClient::new(),
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Atmos is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
