//! Frames - multi-car snapshots on the shared simulation clock.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::telemetry::{Bounds, DriverCode};

/// Tolerance used when snapping a time onto the tick grid, so that exact
/// multiples of the tick interval are not lost to floating-point error.
pub const TICK_EPSILON: f64 = 1e-9;

/// Where a car is in its own series at a given tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    /// Inside the driver's telemetry span, values are interpolated
    Active,
    /// Before the driver's first sample
    NotStarted,
    /// After the driver's last sample (finished or retired)
    Finished,
}

impl fmt::Display for CarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarStatus::Active => write!(f, "active"),
            CarStatus::NotStarted => write!(f, "not_started"),
            CarStatus::Finished => write!(f, "finished"),
        }
    }
}

/// One car in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarState {
    pub driver_code: DriverCode,
    pub x: f64,
    pub y: f64,
    pub speed_kph: f64,
    pub lap: u32,
    pub gear: i32,
    pub status: CarStatus,
}

/// Multi-car snapshot at one tick. Cars are sorted by driver code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub t: f64,
    pub cars: Vec<CarState>,
}

impl Frame {
    /// Copy of this frame restricted to the given drivers
    pub fn only(&self, drivers: &HashSet<DriverCode>) -> Frame {
        Frame {
            t: self.t,
            cars: self
                .cars
                .iter()
                .filter(|c| drivers.contains(&c.driver_code))
                .cloned()
                .collect(),
        }
    }

    pub fn car(&self, driver: &str) -> Option<&CarState> {
        self.cars.iter().find(|c| c.driver_code.as_str() == driver)
    }
}

/// The fixed simulation clock `t0 + k·Δt`, `k in 0..len`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickClock {
    pub t0: f64,
    pub tick_interval: f64,
    pub len: usize,
}

impl TickClock {
    /// Clock covering `[start, end]`; `floor((end - start) / Δt) + 1` ticks.
    pub fn spanning(start: f64, end: f64, tick_interval: f64) -> Self {
        let span = (end - start).max(0.0);
        let len = (span / tick_interval + TICK_EPSILON).floor() as usize + 1;
        TickClock {
            t0: start,
            tick_interval,
            len,
        }
    }

    pub fn time_at(&self, k: usize) -> f64 {
        self.t0 + k as f64 * self.tick_interval
    }

    pub fn last_time(&self) -> f64 {
        self.time_at(self.len.saturating_sub(1))
    }

    /// Index of the nearest tick at or before `t`, clamped into the clock.
    pub fn index_at_or_before(&self, t: f64) -> usize {
        if self.len == 0 || t.is_nan() || t <= self.t0 {
            return 0;
        }
        let k = ((t - self.t0) / self.tick_interval + TICK_EPSILON).floor();
        if k >= (self.len - 1) as f64 {
            self.len - 1
        } else {
            k as usize
        }
    }
}

/// All frames of one race at one tick interval.
///
/// Built once and then shared read-only between every replay session of
/// the race.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    clock: TickClock,
    drivers: Vec<DriverCode>,
    frames: Vec<Frame>,
    bounds: Option<Bounds>,
}

impl FrameSequence {
    pub(crate) fn new(
        clock: TickClock,
        drivers: Vec<DriverCode>,
        frames: Vec<Frame>,
        bounds: Option<Bounds>,
    ) -> Self {
        debug_assert_eq!(clock.len, frames.len());
        FrameSequence {
            clock,
            drivers,
            frames,
            bounds,
        }
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Roster in frame order
    pub fn drivers(&self) -> &[DriverCode] {
        &self.drivers
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn start_time(&self) -> f64 {
        self.clock.t0
    }

    pub fn end_time(&self) -> f64 {
        self.clock.last_time()
    }

    pub fn tick_interval(&self) -> f64 {
        self.clock.tick_interval
    }

    /// Bounding box of every telemetry position that went into the sequence
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }
}
