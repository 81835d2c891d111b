//! Telemetry input types
//!
//! Raw per-driver samples as they come out of storage, plus the identifiers
//! used to key them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a race in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RaceId(String);

impl RaceId {
    pub fn new(id: impl Into<String>) -> Self {
        RaceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RaceId {
    fn from(s: &str) -> Self {
        RaceId(s.to_string())
    }
}

/// Three-letter driver abbreviation ("VER", "HAM", ...).
///
/// Cheap to clone: every frame carries one per car.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverCode(Arc<str>);

impl DriverCode {
    pub fn new(code: &str) -> Self {
        DriverCode(Arc::from(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriverCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DriverCode {
    fn from(s: &str) -> Self {
        DriverCode::new(s)
    }
}

/// A point in track coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }
}

/// One telemetry sample of one car
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    /// Seconds since session start
    pub time_s: f64,
    pub x: f64,
    pub y: f64,
    pub speed_kph: f64,
    /// Throttle pedal, 0..100
    #[serde(default)]
    pub throttle_pct: f64,
    #[serde(default)]
    pub brake_applied: bool,
    /// -1 reverse, 0 neutral
    #[serde(default)]
    pub gear: i32,
    pub lap: u32,
}

impl TelemetrySample {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    /// Time, position and speed are all finite numbers
    pub fn is_finite(&self) -> bool {
        self.time_s.is_finite()
            && self.x.is_finite()
            && self.y.is_finite()
            && self.speed_kph.is_finite()
    }
}

/// Time-ordered telemetry of one driver in one race.
///
/// Sample times are strictly increasing. Construction drops any sample whose
/// time does not advance past the previously kept one (ties keep the first),
/// and any sample with a non-finite time, position or speed.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSeries {
    driver: DriverCode,
    samples: Vec<TelemetrySample>,
}

impl DriverSeries {
    pub fn new(driver: DriverCode, samples: impl IntoIterator<Item = TelemetrySample>) -> Self {
        let mut kept: Vec<TelemetrySample> = Vec::new();
        let mut dropped = 0usize;
        for sample in samples {
            if !sample.is_finite() {
                dropped += 1;
                continue;
            }
            match kept.last() {
                Some(last) if sample.time_s <= last.time_s => dropped += 1,
                _ => kept.push(sample),
            }
        }
        if dropped > 0 {
            log::debug!(
                "{}: dropped {} out-of-order, duplicate or non-finite samples",
                driver,
                dropped
            );
        }
        DriverSeries {
            driver,
            samples: kept,
        }
    }

    pub fn empty(driver: DriverCode) -> Self {
        DriverSeries {
            driver,
            samples: Vec::new(),
        }
    }

    pub fn driver(&self) -> &DriverCode {
        &self.driver
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.samples.first().map(|s| s.time_s)
    }

    pub fn end_time(&self) -> Option<f64> {
        self.samples.last().map(|s| s.time_s)
    }
}

/// Axis-aligned bounding box of track coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn around(p: Position) -> Self {
        Bounds {
            min_x: p.x,
            max_x: p.x,
            min_y: p.y,
            max_y: p.y,
        }
    }

    pub fn include(&mut self, p: Position) {
        self.min_x = self.min_x.min(p.x);
        self.max_x = self.max_x.max(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_y = self.max_y.max(p.y);
    }

    /// Bounds of all points, `None` for an empty iterator
    pub fn of(points: impl IntoIterator<Item = Position>) -> Option<Self> {
        let mut iter = points.into_iter();
        let mut bounds = Bounds::around(iter.next()?);
        for p in iter {
            bounds.include(p);
        }
        Some(bounds)
    }

    /// Map a point into the unit square. An axis without extent maps to 0.5.
    pub fn normalize(&self, p: Position) -> Position {
        fn axis(v: f64, min: f64, max: f64) -> f64 {
            if max > min {
                (v - min) / (max - min)
            } else {
                0.5
            }
        }
        Position::new(
            axis(p.x, self.min_x, self.max_x),
            axis(p.y, self.min_y, self.max_y),
        )
    }
}
