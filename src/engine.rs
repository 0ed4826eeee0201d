//! The engine orchestrator.
//!
//! Owns the single current [`Snapshot`] and the single current [`Location`].
//! Both live in `watch` cells: writers replace the whole value, readers take
//! a cheap clone and never see a half-built snapshot.
//!
//! # States
//!
//! - `Uninitialized`: no snapshot built yet. Reads return the default snapshot,
//!   flagged with an error marker once an update has failed.
//! - `Ready`: at least one update cycle succeeded. A failed cycle leaves the
//!   previous snapshot in place.
//!
//! Update cycles never overlap. A scheduled trigger that arrives while a cycle
//! is in flight is dropped ([`CycleOutcome::Skipped`]). A forced trigger waits,
//! and any number of forced triggers waiting together share one fresh cycle
//! ([`CycleOutcome::Coalesced`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, instrument, warn};

use crate::aggregation::build_snapshot;
use crate::data_sources::{Geocoder, LocationDetector, ReadingsSource, SnapshotSink};
use crate::error::{AtmosError, Result};
use crate::model::{Location, PollutantKind, SAFETY_LIMITS, SafetyLimits, Snapshot};
use crate::storage::Storage;

/// Marker attached to the default snapshot while no data could be fetched.
pub const DEGRADED_MESSAGE: &str = "Data temporarily unavailable";

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
}

/// What an update trigger ended up doing.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A new snapshot was published.
    Updated(Arc<Snapshot>),
    /// Another cycle was already running; this trigger was dropped.
    Skipped,
    /// A cycle that started after this trigger already ran; carries the
    /// snapshot current after it.
    Coalesced(Arc<Snapshot>),
    /// Ingestion failed; the previous snapshot stays visible.
    Failed(AtmosError),
}

/// Single-writer owner of the current snapshot and location.
pub struct Engine {
    source: Arc<dyn ReadingsSource>,
    geocoder: Arc<dyn Geocoder>,
    sink: Option<Arc<dyn SnapshotSink>>,
    storage: Storage,
    snapshot: watch::Sender<Arc<Snapshot>>,
    location: watch::Sender<Option<Location>>,
    ready: AtomicBool,
    update_lock: Mutex<()>,
    cycles_started: AtomicU64,
}

impl Engine {
    /// Create an uninitialized engine with no location.
    pub fn new(
        source: Arc<dyn ReadingsSource>,
        geocoder: Arc<dyn Geocoder>,
        storage: Storage,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Snapshot::default()));
        let (location, _) = watch::channel(None);
        Self {
            source,
            geocoder,
            sink: None,
            storage,
            snapshot,
            location,
            ready: AtomicBool::new(false),
            update_lock: Mutex::new(()),
            cycles_started: AtomicU64::new(0),
        }
    }

    /// Forward every published snapshot to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The current snapshot. Never fails.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    /// Receiver that observes every snapshot publication.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    /// The current location, if one has been set.
    pub fn location(&self) -> Option<Location> {
        self.location.borrow().clone()
    }

    /// The safety limits table.
    pub fn limits(&self) -> SafetyLimits {
        SAFETY_LIMITS
    }

    pub fn state(&self) -> EngineState {
        if self.ready.load(Ordering::Acquire) {
            EngineState::Ready
        } else {
            EngineState::Uninitialized
        }
    }

    /// Restore the persisted location and rebuild a snapshot from the last
    /// persisted readings.
    ///
    /// Returns `true` if a location was restored.
    pub async fn restore(&self) -> Result<bool> {
        let location = self.storage.load_location().await?;
        let restored = location.is_some();
        if let Some(location) = location {
            info!(location = %location.name, "Restored persisted location");
            self.location.send_replace(Some(location));
        }

        let raw = self.storage.load_readings().await?;
        if !raw.pollutants.is_empty() {
            let name = self.location().map(|l| l.name);
            let snapshot = build_snapshot(&raw, Utc::now(), name.as_deref());
            info!(alert_level = ?snapshot.alert_level, "Rebuilt snapshot from persisted readings");
            self.publish(snapshot);
        }

        Ok(restored)
    }

    /// Replace the current location wholesale and persist it.
    ///
    /// Does not trigger an update cycle.
    pub async fn replace_location(&self, location: Location) {
        if let Err(e) = self.storage.save_location(&location).await {
            warn!(error = %e, "Failed to persist location");
        }
        info!(
            location = %location.name,
            latitude = location.latitude,
            longitude = location.longitude,
            "Location updated"
        );
        self.location.send_replace(Some(location));
    }

    /// Geocode a place name without touching engine state.
    pub async fn resolve_location(&self, name: &str) -> Result<Location> {
        let name = validate_location_name(name)?;
        self.geocoder.resolve(name).await
    }

    /// Geocode `name`, make it the current location, and force an update.
    ///
    /// Fails fast on a blank name or a failed lookup, leaving state untouched.
    /// A failure of the forced update does not fail the location change.
    #[instrument(skip(self))]
    pub async fn set_location(&self, name: &str) -> Result<Location> {
        let location = self.resolve_location(name).await?;
        self.replace_location(location.clone()).await;

        if let CycleOutcome::Failed(e) = self.force_update_cycle().await {
            warn!(error = %e, "Update after location change failed");
        }

        Ok(location)
    }

    /// Detect the location from the public IP and make it current.
    pub async fn detect_location(&self, detector: &dyn LocationDetector) -> Result<Location> {
        let location = detector.detect().await?;
        self.replace_location(location.clone()).await;
        Ok(location)
    }

    /// Run one update cycle unless one is already running.
    #[instrument(skip(self))]
    pub async fn run_update_cycle(&self) -> CycleOutcome {
        match self.update_lock.try_lock() {
            Ok(_guard) => self.update().await,
            Err(_) => {
                info!("Update already in progress, skipping trigger");
                CycleOutcome::Skipped
            }
        }
    }

    /// Make sure a cycle starting after this call has run.
    ///
    /// Waits for any in-flight cycle first. If another forced trigger already
    /// ran a newer cycle while this one waited, its result is reused instead
    /// of fetching again.
    pub async fn force_update_cycle(&self) -> CycleOutcome {
        let requested_after = self.cycles_started.load(Ordering::Acquire);
        let _guard = self.update_lock.lock().await;
        if self.cycles_started.load(Ordering::Acquire) > requested_after {
            return CycleOutcome::Coalesced(self.snapshot());
        }
        self.update().await
    }

    /// Must be called with `update_lock` held.
    async fn update(&self) -> CycleOutcome {
        self.cycles_started.fetch_add(1, Ordering::AcqRel);
        match self.ingest().await {
            Ok(snapshot) => CycleOutcome::Updated(snapshot),
            Err(e) => {
                if e.is_ingestion_failure() {
                    warn!(error = %e, "Update cycle failed, keeping previous snapshot");
                } else {
                    error!(error = %e, "Update cycle aborted, keeping previous snapshot");
                }
                self.mark_degraded();
                CycleOutcome::Failed(e)
            }
        }
    }

    async fn ingest(&self) -> Result<Arc<Snapshot>> {
        let location = self
            .location()
            .ok_or_else(|| AtmosError::UpstreamUnavailable("no location set".to_string()))?;

        let raw = self.source.fetch(&location).await?;
        if PollutantKind::ALL.iter().all(|kind| raw.series(*kind).is_none()) {
            return Err(AtmosError::NoData);
        }

        let snapshot = build_snapshot(&raw, Utc::now(), Some(&location.name));

        if let Err(e) = self.storage.replace_readings(&raw).await {
            warn!(error = %e, "Failed to persist readings");
        }

        info!(
            location = %location.name,
            alert_level = ?snapshot.alert_level,
            critical_pollutant = ?snapshot.critical_pollutant,
            aqi = snapshot.aqi.value,
            "Snapshot updated"
        );

        let snapshot = self.publish(snapshot);

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.publish(&snapshot).await {
                warn!(error = %e, "Failed to forward snapshot");
            }
        }

        Ok(snapshot)
    }

    fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshot.send_replace(snapshot.clone());
        self.ready.store(true, Ordering::Release);
        snapshot
    }

    fn mark_degraded(&self) {
        if self.state() == EngineState::Ready {
            return;
        }
        self.snapshot.send_if_modified(|current| {
            if current.error.is_some() {
                return false;
            }
            *current = Arc::new(Snapshot {
                error: Some(DEGRADED_MESSAGE.to_string()),
                ..Snapshot::default()
            });
            true
        });
    }
}

fn validate_location_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AtmosError::InvalidInput(
            "parameter \"location\" is required".to_string(),
        ));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertLevel, RawReadings, Sample};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Source that replays scripted results, then keeps failing.
    struct ScriptedSource {
        results: StdMutex<VecDeque<Result<RawReadings>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<RawReadings>>) -> Arc<Self> {
            Arc::new(Self {
                results: StdMutex::new(results.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ReadingsSource for ScriptedSource {
        async fn fetch(&self, _location: &Location) -> Result<RawReadings> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AtmosError::UpstreamUnavailable("script exhausted".into())))
        }
    }

    /// Source that blocks until released, to hold a cycle in flight.
    struct GatedSource {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ReadingsSource for GatedSource {
        async fn fetch(&self, _location: &Location) -> Result<RawReadings> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(readings("pm2p5:ugm3", &[5.0, 6.0]))
        }
    }

    /// Source that takes a while and records the location of every fetch.
    struct SlowSource {
        fetched: StdMutex<Vec<String>>,
    }

    impl SlowSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fetched: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.fetched.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ReadingsSource for SlowSource {
        async fn fetch(&self, location: &Location) -> Result<RawReadings> {
            self.fetched.lock().unwrap().push(location.name.clone());
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(readings("pm2p5:ugm3", &[5.0, 6.0]))
        }
    }

    struct FakeGeocoder;

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn resolve(&self, name: &str) -> Result<Location> {
            match name {
                "Sorocaba" => Ok(Location::new("Sorocaba, SP, Brasil", -23.5, -47.45)),
                _ => Err(AtmosError::LocationNotFound(name.to_string())),
            }
        }
    }

    struct FakeDetector;

    #[async_trait]
    impl LocationDetector for FakeDetector {
        async fn detect(&self) -> Result<Location> {
            let mut location = Location::new("Campinas, São Paulo, Brazil", -22.9, -47.06);
            location.source_ip = Some("203.0.113.1".to_string());
            Ok(location)
        }
    }

    fn readings(parameter: &str, values: &[f64]) -> RawReadings {
        let now = Utc::now();
        let mut raw = RawReadings::default();
        raw.insert_parameter(
            parameter,
            values.iter().map(|v| Sample::new(now, *v)).collect(),
        );
        raw
    }

    async fn engine_with(source: Arc<dyn ReadingsSource>) -> Engine {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let engine = Engine::new(source, Arc::new(FakeGeocoder), storage);
        engine
            .replace_location(Location::new("São Paulo", -23.55, -46.63))
            .await;
        engine
    }

    #[tokio::test]
    async fn test_uninitialized_reads_default() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let engine = Engine::new(ScriptedSource::new(vec![]), Arc::new(FakeGeocoder), storage);

        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(*engine.snapshot(), Snapshot::default());
        assert!(engine.location().is_none());
    }

    #[tokio::test]
    async fn test_successful_cycle_publishes() {
        let source = ScriptedSource::new(vec![Ok(readings("pm2p5:ugm3", &[18.0, 17.0]))]);
        let engine = engine_with(source).await;

        let outcome = engine.run_update_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Updated(_)));
        assert_eq!(engine.state(), EngineState::Ready);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.current_values[&PollutantKind::Pm25], 18.0);
        assert!(snapshot.recommendations.close_windows);
        assert_eq!(snapshot.location.as_deref(), Some("São Paulo"));
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_before_first_snapshot_marks_degraded() {
        let source = ScriptedSource::new(vec![Err(AtmosError::UpstreamUnavailable(
            "timeout".into(),
        ))]);
        let engine = engine_with(source).await;

        let outcome = engine.run_update_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed(AtmosError::UpstreamUnavailable(_))
        ));
        assert_eq!(engine.state(), EngineState::Uninitialized);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some(DEGRADED_MESSAGE));
        assert_eq!(snapshot.alert_level, AlertLevel::Good);
        assert!(!snapshot.recommendations.close_windows);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_snapshot() {
        let source = ScriptedSource::new(vec![
            Ok(readings("no2:ugm3", &[250.0])),
            Err(AtmosError::UpstreamUnavailable("502".into())),
        ]);
        let engine = engine_with(source).await;

        engine.run_update_cycle().await;
        let before = engine.snapshot();

        engine.run_update_cycle().await;
        let after = engine.snapshot();

        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.error.is_none());
        assert!(after.recommendations.close_windows);
    }

    #[tokio::test]
    async fn test_humidity_only_is_no_data() {
        let source = ScriptedSource::new(vec![Ok(readings("relative_humidity_2m:p", &[55.0]))]);
        let engine = engine_with(source).await;

        let outcome = engine.run_update_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Failed(AtmosError::NoData)));
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_skipped() {
        let source = Arc::new(GatedSource {
            started: Notify::new(),
            release: Notify::new(),
        });
        let engine = Arc::new(engine_with(source.clone()).await);

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_update_cycle().await })
        };
        source.started.notified().await;

        assert!(matches!(engine.run_update_cycle().await, CycleOutcome::Skipped));

        source.release.notify_one();
        let outcome = running.await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn test_concurrent_forced_triggers_share_one_cycle() {
        let source = SlowSource::new();
        let engine = Arc::new(engine_with(source.clone()).await);

        let in_flight = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_update_cycle().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 1);

        let forced: Vec<_> = (0..10)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.force_update_cycle().await })
            })
            .collect();

        assert!(matches!(in_flight.await.unwrap(), CycleOutcome::Updated(_)));
        let mut ran = 0;
        for handle in forced {
            match handle.await.unwrap() {
                CycleOutcome::Updated(_) => ran += 1,
                CycleOutcome::Coalesced(snapshot) => assert!(snapshot.error.is_none()),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(ran, 1);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_location_change_does_not_reuse_older_cycle() {
        let source = SlowSource::new();
        let engine = Arc::new(engine_with(source.clone()).await);

        let in_flight = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_update_cycle().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        engine.set_location("Sorocaba").await.unwrap();
        in_flight.await.unwrap();

        assert_eq!(
            *source.fetched.lock().unwrap(),
            vec!["São Paulo".to_string(), "Sorocaba, SP, Brasil".to_string()]
        );
        assert_eq!(
            engine.snapshot().location.as_deref(),
            Some("Sorocaba, SP, Brasil")
        );
    }

    #[tokio::test]
    async fn test_set_location_rejects_blank_name() {
        let source = ScriptedSource::new(vec![]);
        let engine = engine_with(source.clone()).await;

        let result = engine.set_location("   ").await;
        assert!(matches!(result, Err(AtmosError::InvalidInput(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_location_not_found_keeps_state() {
        let source = ScriptedSource::new(vec![]);
        let engine = engine_with(source.clone()).await;

        let result = engine.set_location("Atlantis").await;
        assert!(matches!(result, Err(AtmosError::LocationNotFound(_))));
        assert_eq!(engine.location().unwrap().name, "São Paulo");
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_location_forces_update() {
        let source = ScriptedSource::new(vec![Ok(readings("o3:ugm3", &[90.0, 95.0]))]);
        let engine = engine_with(source.clone()).await;

        let location = engine.set_location("Sorocaba").await.unwrap();
        assert_eq!(location.name, "Sorocaba, SP, Brasil");
        assert_eq!(engine.location(), Some(location));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.snapshot().location.as_deref(),
            Some("Sorocaba, SP, Brasil")
        );
    }

    #[tokio::test]
    async fn test_set_location_succeeds_when_update_fails() {
        let source = ScriptedSource::new(vec![]);
        let engine = engine_with(source).await;

        let location = engine.set_location("Sorocaba").await.unwrap();
        assert_eq!(engine.location(), Some(location));
    }

    #[tokio::test]
    async fn test_detect_location() {
        let engine = engine_with(ScriptedSource::new(vec![])).await;

        let location = engine.detect_location(&FakeDetector).await.unwrap();
        assert_eq!(engine.location(), Some(location));
        assert_eq!(
            engine.location().unwrap().source_ip.as_deref(),
            Some("203.0.113.1")
        );
    }

    #[tokio::test]
    async fn test_restore_from_storage() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        storage
            .save_location(&Location::new("Sorocaba", -23.5, -47.45))
            .await
            .unwrap();
        storage
            .replace_readings(&readings("pm2p5:ugm3", &[40.0, 41.0]))
            .await
            .unwrap();

        let engine = Engine::new(ScriptedSource::new(vec![]), Arc::new(FakeGeocoder), storage);
        assert!(engine.restore().await.unwrap());

        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.location().unwrap().name, "Sorocaba");
        let snapshot = engine.snapshot();
        assert!(snapshot.recommendations.run_purifier);
        assert_eq!(snapshot.location.as_deref(), Some("Sorocaba"));
    }

    #[tokio::test]
    async fn test_limits_table() {
        let engine = engine_with(ScriptedSource::new(vec![])).await;
        let limits = engine.limits();
        assert_eq!(limits.pm25, 15.0);
        assert_eq!(limits.no2, 200.0);
        assert_eq!(limits.humidity_max, 60.0);
    }
}
