//! Telemetry storage.
//!
//! The replay pipeline reads races through the [`TelemetryStore`] trait. Two
//! backends are provided:
//!
//! - [`FileTelemetryStore`] reads JSON files from the data directory:
//!   `{data_dir}/races/{race_id}/drivers/{code}.json` (array of samples) and
//!   `{data_dir}/races/{race_id}/reference_lap.json` (array of `{x, y}`).
//! - [`MemoryTelemetryStore`] holds races in memory and counts fetches, for
//!   tests and demos.

use async_trait::async_trait;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

use raceline_core::{DriverCode, DriverSeries, Position, RaceId, ReplayError, TelemetrySample};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No such race '{0}'")]
    NoSuchRace(String),
    #[error("No such driver '{driver}' in race '{race}'")]
    NoSuchDriver { race: String, driver: String },
    #[error("No reference lap for race '{0}'")]
    NoReferenceLap(String),
    #[error("Cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed telemetry file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for ReplayError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NoSuchRace(race) => ReplayError::NoSuchRace(race),
            StorageError::NoSuchDriver { race, driver } => ReplayError::NoSuchDriver { race, driver },
            StorageError::NoReferenceLap(race) => ReplayError::NoReferenceLap(race),
            e => ReplayError::Upstream(e.to_string()),
        }
    }
}

/// Read access to stored race telemetry
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Drivers that took part in `race`, in ascending code order
    async fn list_drivers(&self, race: &RaceId) -> Result<Vec<DriverCode>, StorageError>;

    async fn fetch_driver_series(
        &self,
        race: &RaceId,
        driver: &DriverCode,
    ) -> Result<DriverSeries, StorageError>;

    /// Dense `(x, y)` trace of one representative lap
    async fn fetch_reference_lap_polyline(
        &self,
        race: &RaceId,
    ) -> Result<Vec<Position>, StorageError>;
}

// =============================================================================
// File-backed store
// =============================================================================

pub struct FileTelemetryStore {
    base_dir: PathBuf,
}

impl FileTelemetryStore {
    pub fn new(data_dir: &Path) -> Self {
        let base_dir = data_dir.join("races");
        debug!("Race telemetry directory: {}", base_dir.display());
        FileTelemetryStore { base_dir }
    }

    fn race_dir(&self, race: &RaceId) -> Result<PathBuf, StorageError> {
        if !is_safe_component(race.as_str()) {
            return Err(StorageError::NoSuchRace(race.to_string()));
        }
        Ok(self.base_dir.join(race.as_str()))
    }
}

/// Identifiers become path components, so they must not escape the base dir
fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
    not_found: impl FnOnce() -> StorageError,
) -> Result<T, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl TelemetryStore for FileTelemetryStore {
    async fn list_drivers(&self, race: &RaceId) -> Result<Vec<DriverCode>, StorageError> {
        let dir = self.race_dir(race)?.join("drivers");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NoSuchRace(race.to_string()))
            }
            Err(source) => return Err(StorageError::Io { path: dir, source }),
        };

        let mut drivers = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => return Err(StorageError::Io { path: dir, source }),
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(code) if is_safe_component(code) => drivers.push(DriverCode::new(code)),
                _ => warn!("Ignoring unexpected file {}", path.display()),
            }
        }
        drivers.sort();
        debug!("Race {} has {} drivers", race, drivers.len());
        Ok(drivers)
    }

    async fn fetch_driver_series(
        &self,
        race: &RaceId,
        driver: &DriverCode,
    ) -> Result<DriverSeries, StorageError> {
        let no_such_driver = || StorageError::NoSuchDriver {
            race: race.to_string(),
            driver: driver.to_string(),
        };
        if !is_safe_component(driver.as_str()) {
            return Err(no_such_driver());
        }
        let path = self
            .race_dir(race)?
            .join("drivers")
            .join(format!("{}.json", driver));
        let samples: Vec<TelemetrySample> = read_json(&path, no_such_driver).await?;
        Ok(DriverSeries::new(driver.clone(), samples))
    }

    async fn fetch_reference_lap_polyline(
        &self,
        race: &RaceId,
    ) -> Result<Vec<Position>, StorageError> {
        let path = self.race_dir(race)?.join("reference_lap.json");
        read_json(&path, || StorageError::NoReferenceLap(race.to_string())).await
    }
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Default)]
struct MemoryRace {
    drivers: BTreeMap<DriverCode, Vec<TelemetrySample>>,
    reference_lap: Option<Vec<Position>>,
}

/// In-memory [`TelemetryStore`] that counts how often it is read
#[derive(Default)]
pub struct MemoryTelemetryStore {
    races: RwLock<HashMap<RaceId, MemoryRace>>,
    /// Simulated storage round trip, applied to every fetch
    latency: Option<Duration>,
    series_fetches: AtomicUsize,
    polyline_fetches: AtomicUsize,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        MemoryTelemetryStore {
            latency: Some(latency),
            ..Default::default()
        }
    }

    /// Register a race, so it exists even without any driver
    pub fn insert_race(&self, race: &RaceId) {
        self.write().entry(race.clone()).or_default();
    }

    pub fn insert_series(&self, race: &RaceId, driver: &DriverCode, samples: Vec<TelemetrySample>) {
        self.write()
            .entry(race.clone())
            .or_default()
            .drivers
            .insert(driver.clone(), samples);
    }

    pub fn insert_reference_lap(&self, race: &RaceId, polyline: Vec<Position>) {
        self.write().entry(race.clone()).or_default().reference_lap = Some(polyline);
    }

    pub fn series_fetches(&self) -> usize {
        self.series_fetches.load(Ordering::Relaxed)
    }

    pub fn polyline_fetches(&self) -> usize {
        self.polyline_fetches.load(Ordering::Relaxed)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<RaceId, MemoryRace>> {
        self.races.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_race<T>(
        &self,
        race: &RaceId,
        f: impl FnOnce(&MemoryRace) -> T,
    ) -> Result<T, StorageError> {
        let races = self.races.read().unwrap_or_else(PoisonError::into_inner);
        races
            .get(race)
            .map(f)
            .ok_or_else(|| StorageError::NoSuchRace(race.to_string()))
    }

    async fn round_trip(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn list_drivers(&self, race: &RaceId) -> Result<Vec<DriverCode>, StorageError> {
        self.round_trip().await;
        self.with_race(race, |r| r.drivers.keys().cloned().collect())
    }

    async fn fetch_driver_series(
        &self,
        race: &RaceId,
        driver: &DriverCode,
    ) -> Result<DriverSeries, StorageError> {
        self.series_fetches.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await;
        let samples = self
            .with_race(race, |r| r.drivers.get(driver).cloned())?
            .ok_or_else(|| StorageError::NoSuchDriver {
                race: race.to_string(),
                driver: driver.to_string(),
            })?;
        Ok(DriverSeries::new(driver.clone(), samples))
    }

    async fn fetch_reference_lap_polyline(
        &self,
        race: &RaceId,
    ) -> Result<Vec<Position>, StorageError> {
        self.polyline_fetches.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await;
        self.with_race(race, |r| r.reference_lap.clone())?
            .ok_or_else(|| StorageError::NoReferenceLap(race.to_string()))
    }
}
