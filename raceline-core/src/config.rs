//! Replay configuration
//!
//! Service-wide defaults ([`ReplayConfig`]) and the per-request overrides a
//! client may pass when opening a replay ([`ReplayOptions`]).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ReplayError;
use crate::telemetry::{DriverCode, Position};

pub const DEFAULT_TICK_INTERVAL_S: f64 = 0.1;
pub const DEFAULT_DECIMATE_FACTOR: usize = 20;
pub const DEFAULT_OUTPUT_FPS: f64 = 10.0;
pub const DEFAULT_MAX_SESSIONS_PER_RACE: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayConfig {
    /// Simulation clock step of composed frames, in race seconds
    pub tick_interval_s: f64,
    /// Keep every Nth point of the reference lap
    pub decimate_factor: usize,
    /// Frames per wall-clock second at the initial speed
    pub output_fps: f64,
    pub max_sessions_per_race: usize,
    /// Where cars wait before their first sample
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pit_anchor: Option<Position>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            tick_interval_s: DEFAULT_TICK_INTERVAL_S,
            decimate_factor: DEFAULT_DECIMATE_FACTOR,
            output_fps: DEFAULT_OUTPUT_FPS,
            max_sessions_per_race: DEFAULT_MAX_SESSIONS_PER_RACE,
            pit_anchor: None,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ReplayError> {
        validate_tick_interval(self.tick_interval_s)?;
        validate_decimate_factor(self.decimate_factor)?;
        if !(self.output_fps.is_finite() && self.output_fps > 0.0) {
            return Err(ReplayError::invalid(
                "output_fps",
                format!("must be a positive number, got {}", self.output_fps),
            ));
        }
        if self.max_sessions_per_race == 0 {
            return Err(ReplayError::invalid(
                "max_sessions_per_race",
                "must be at least 1",
            ));
        }
        if let Some(p) = self.pit_anchor {
            if !(p.x.is_finite() && p.y.is_finite()) {
                return Err(ReplayError::invalid("pit_anchor", "must be finite"));
            }
        }
        Ok(())
    }

    /// Speed multiplier a new session starts with.
    ///
    /// A session emits one frame per `Δt / speed` wall seconds, so emitting
    /// `output_fps` frames per second needs `speed = output_fps · Δt`. With
    /// the defaults that is real time.
    pub fn initial_speed(&self, tick_interval_s: f64) -> f64 {
        self.output_fps * tick_interval_s
    }
}

/// Per-replay overrides. Unset fields fall back to [`ReplayConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOptions {
    #[serde(default)]
    pub tick_interval_s: Option<f64>,
    #[serde(default)]
    pub decimate_factor: Option<usize>,
    /// Only these drivers appear in emitted frames
    #[serde(default)]
    pub drivers: Option<Vec<DriverCode>>,
}

/// [`ReplayOptions`] merged with the service defaults and validated
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub tick_interval_s: f64,
    pub decimate_factor: usize,
    pub drivers: Option<HashSet<DriverCode>>,
}

impl ReplayOptions {
    pub fn resolve(&self, config: &ReplayConfig) -> Result<ResolvedOptions, ReplayError> {
        let tick_interval_s = self.tick_interval_s.unwrap_or(config.tick_interval_s);
        validate_tick_interval(tick_interval_s)?;
        let decimate_factor = self.decimate_factor.unwrap_or(config.decimate_factor);
        validate_decimate_factor(decimate_factor)?;

        let drivers = match &self.drivers {
            Some(list) if list.is_empty() => {
                return Err(ReplayError::invalid("drivers", "must not be empty"));
            }
            Some(list) => Some(list.iter().cloned().collect()),
            None => None,
        };

        Ok(ResolvedOptions {
            tick_interval_s,
            decimate_factor,
            drivers,
        })
    }
}

fn validate_tick_interval(dt: f64) -> Result<(), ReplayError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(ReplayError::invalid(
            "tick_interval_s",
            format!("must be a positive number of seconds, got {}", dt),
        ))
    }
}

fn validate_decimate_factor(factor: usize) -> Result<(), ReplayError> {
    if factor == 0 {
        Err(ReplayError::invalid("decimate_factor", "must be at least 1"))
    } else {
        Ok(())
    }
}
