use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

use raceline_core::{
    compose, decimate, Bounds, Command, DriverCode, DriverSeries, FrameSequence, PlaybackStatus,
    RaceId, ReplayConfig, ReplayError, ReplayOptions, TrackShape,
};

use super::registry::SessionRegistry;
use super::session::{FrameStream, SessionId};
use crate::cache::BuildCache;
use crate::storage::{StorageError, TelemetryStore};

/// Frame sequences are cached per race and exact tick interval
type FramesKey = (RaceId, u64);
type ShapeKey = (RaceId, usize);

/// Tick intervals are validated finite and positive, so equal bits mean
/// equal intervals.
fn tick_key(tick_interval_s: f64) -> u64 {
    tick_interval_s.to_bits()
}

/// Returned when a replay is opened
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayInfo {
    pub session_id: SessionId,
    pub race_id: RaceId,
    pub frame_count: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub tick_interval_s: f64,
    pub speed_multiplier: f64,
    /// Drivers whose cars appear in this session's frames
    pub drivers: Vec<DriverCode>,
    pub bounds: Option<Bounds>,
    /// Missing when the race has no reference lap
    pub track_shape: Option<Arc<TrackShape>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub race_id: RaceId,
    pub opened_at: DateTime<Utc>,
    pub subscribed: bool,
    #[serde(flatten)]
    pub playback: PlaybackStatus,
}

/// Entry point of the replay pipeline: builds (and caches) what a race
/// needs, and owns the live sessions.
pub struct ReplayService {
    config: ReplayConfig,
    store: Arc<dyn TelemetryStore>,
    frames: BuildCache<FramesKey, FrameSequence>,
    shapes: BuildCache<ShapeKey, TrackShape>,
    registry: SessionRegistry,
}

impl ReplayService {
    pub fn new(config: ReplayConfig, store: Arc<dyn TelemetryStore>) -> Result<Self, ReplayError> {
        config.validate()?;
        info!(
            "Replay service: tick {}s, decimate 1/{}, {} fps, max {} sessions per race",
            config.tick_interval_s,
            config.decimate_factor,
            config.output_fps,
            config.max_sessions_per_race
        );
        Ok(ReplayService {
            registry: SessionRegistry::new(config.max_sessions_per_race),
            config,
            store,
            frames: BuildCache::new("frames"),
            shapes: BuildCache::new("track"),
        })
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of frame sequence builds started so far
    pub fn frame_builds(&self) -> usize {
        self.frames.builds()
    }

    /// All frames of `race` at `tick_interval_s`, built on first use.
    pub async fn frame_sequence(
        &self,
        race: &RaceId,
        tick_interval_s: f64,
    ) -> Result<Arc<FrameSequence>, ReplayError> {
        let store = self.store.clone();
        let race_id = race.clone();
        let pit_anchor = self.config.pit_anchor;
        self.frames
            .get_or_build((race.clone(), tick_key(tick_interval_s)), move || async move {
                let series = fetch_race(store.as_ref(), &race_id).await?;
                let frames = tokio::task::spawn_blocking(move || {
                    compose(&series, tick_interval_s, pit_anchor)
                })
                .await
                .map_err(|e| ReplayError::Upstream(format!("Frame composition failed: {}", e)))??;
                info!(
                    "Race {}: composed {} frames for {} drivers",
                    race_id,
                    frames.len(),
                    frames.drivers().len()
                );
                Ok(frames)
            })
            .await
    }

    /// Decimated outline of the circuit of `race`, built on first use.
    pub async fn track_shape(
        &self,
        race: &RaceId,
        decimate_factor: usize,
    ) -> Result<Arc<TrackShape>, ReplayError> {
        let store = self.store.clone();
        let race_id = race.clone();
        self.shapes
            .get_or_build((race.clone(), decimate_factor), move || async move {
                let polyline = store.fetch_reference_lap_polyline(&race_id).await?;
                let shape = decimate(&polyline, decimate_factor)?;
                debug!(
                    "Race {}: track shape {} -> {} points",
                    race_id,
                    polyline.len(),
                    shape.len()
                );
                Ok(shape)
            })
            .await
    }

    /// Open a new, idle replay session of `race`.
    pub async fn open_replay(
        &self,
        race: &RaceId,
        options: &ReplayOptions,
    ) -> Result<ReplayInfo, ReplayError> {
        let options = options.resolve(&self.config)?;
        self.registry.ensure_capacity(race)?;

        let frames = self.frame_sequence(race, options.tick_interval_s).await?;
        if let Some(wanted) = &options.drivers {
            if let Some(missing) = wanted.iter().find(|d| !frames.drivers().contains(d)) {
                return Err(ReplayError::NoSuchDriver {
                    race: race.to_string(),
                    driver: missing.to_string(),
                });
            }
        }

        let track_shape = match self.track_shape(race, options.decimate_factor).await {
            Ok(shape) => Some(shape),
            Err(e @ ReplayError::InvalidParameter { .. }) => return Err(e),
            Err(e) => {
                warn!("Race {}: replay opened without track shape: {}", race, e);
                None
            }
        };

        let speed = self.config.initial_speed(options.tick_interval_s);
        let session = self
            .registry
            .create(race, frames.clone(), options.drivers.clone(), speed)?;

        let drivers = match &options.drivers {
            Some(wanted) => frames
                .drivers()
                .iter()
                .filter(|d| wanted.contains(*d))
                .cloned()
                .collect(),
            None => frames.drivers().to_vec(),
        };

        Ok(ReplayInfo {
            session_id: session.id().to_string(),
            race_id: race.clone(),
            frame_count: frames.len(),
            start_time: frames.start_time(),
            end_time: frames.end_time(),
            tick_interval_s: frames.tick_interval(),
            speed_multiplier: speed,
            drivers,
            bounds: frames.bounds(),
            track_shape,
        })
    }

    /// Apply `command` to a session. `close` also releases the session.
    pub fn control(&self, id: &str, command: &Command) -> Result<PlaybackStatus, ReplayError> {
        let session = self.registry.get(id)?;
        let status = session.control(command)?;
        if status.state.is_closed() {
            self.registry.close(id);
        }
        Ok(status)
    }

    pub fn subscribe(&self, id: &str) -> Result<FrameStream, ReplayError> {
        self.registry.get(id)?.subscribe()
    }

    pub fn status(&self, id: &str) -> Result<SessionStatus, ReplayError> {
        let session = self.registry.get(id)?;
        Ok(SessionStatus {
            session_id: session.id().to_string(),
            race_id: session.race_id().clone(),
            opened_at: session.opened_at(),
            subscribed: session.is_subscribed(),
            playback: session.status(),
        })
    }

    pub fn close(&self, id: &str) -> bool {
        self.registry.close(id)
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

/// Fetch every driver of `race`. A listed driver without stored telemetry
/// stays in the roster with an empty series.
async fn fetch_race(
    store: &dyn TelemetryStore,
    race: &RaceId,
) -> Result<Vec<DriverSeries>, ReplayError> {
    let drivers = store.list_drivers(race).await?;
    let fetched = join_all(
        drivers
            .iter()
            .map(|driver| store.fetch_driver_series(race, driver)),
    )
    .await;

    drivers
        .into_iter()
        .zip(fetched)
        .map(|(driver, result)| match result {
            Ok(series) => Ok(series),
            Err(StorageError::NoSuchDriver { .. }) => {
                warn!("Race {}: no telemetry for {}", race, driver);
                Ok(DriverSeries::empty(driver))
            }
            Err(e) => Err(e.into()),
        })
        .collect()
}
