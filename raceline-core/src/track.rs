//! Track shape reduction
//!
//! The track outline is drawn from the raw positions of one reference lap,
//! which is far denser than a map needs. The reducer keeps every Nth point,
//! always including the first and last so the outline closes where the lap
//! does. Fixed-stride decimation is deterministic and `O(n)`.

use serde::{Deserialize, Serialize};

use crate::error::ReplayError;
use crate::telemetry::{Bounds, Position};

/// A single point of a track outline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    /// Position in the original (undecimated) polyline
    pub order_index: usize,
    pub x: f64,
    pub y: f64,
}

/// Decimated outline of a circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackShape {
    pub decimate_factor: usize,
    pub points: Vec<TrackPoint>,
}

impl TrackShape {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::of(self.points.iter().map(|p| Position::new(p.x, p.y)))
    }

    /// Same outline mapped into the unit square of `bounds`
    pub fn normalized(&self, bounds: &Bounds) -> TrackShape {
        TrackShape {
            decimate_factor: self.decimate_factor,
            points: self
                .points
                .iter()
                .map(|p| {
                    let n = bounds.normalize(Position::new(p.x, p.y));
                    TrackPoint {
                        order_index: p.order_index,
                        x: n.x,
                        y: n.y,
                    }
                })
                .collect(),
        }
    }
}

/// Reduce `polyline` to every `decimate_factor`-th point.
///
/// The result never has more than `ceil(n / decimate_factor)` points, except
/// that first and last are always both present (so a 2-point minimum when
/// `decimate_factor == n`). When the last point is off-stride it replaces the
/// final stride point instead of being appended.
pub fn decimate(polyline: &[Position], decimate_factor: usize) -> Result<TrackShape, ReplayError> {
    let n = polyline.len();
    if decimate_factor == 0 || decimate_factor > n {
        return Err(ReplayError::invalid(
            "decimate_factor",
            format!("must be in 1..={}, got {}", n, decimate_factor),
        ));
    }

    let mut kept: Vec<usize> = (0..n).step_by(decimate_factor).collect();
    let last = n - 1;
    if kept.last() != Some(&last) {
        if kept.len() > 1 {
            if let Some(tail) = kept.last_mut() {
                *tail = last;
            }
        } else {
            kept.push(last);
        }
    }

    let points = kept
        .into_iter()
        .map(|i| TrackPoint {
            order_index: i,
            x: polyline[i].x,
            y: polyline[i].y,
        })
        .collect();

    Ok(TrackShape {
        decimate_factor,
        points,
    })
}
