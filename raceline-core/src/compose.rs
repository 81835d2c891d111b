//! Frame composition
//!
//! Builds the [`FrameSequence`] of a race: every driver is resampled onto the
//! union clock of all drivers (in parallel, one column per driver) and the
//! columns are then zipped tick by tick into frames.

use rayon::prelude::*;

use crate::error::ReplayError;
use crate::frame::{CarState, Frame, FrameSequence, TickClock, TICK_EPSILON};
use crate::resample::resample;
use crate::telemetry::{Bounds, DriverSeries, Position};

/// Upper bound on the frames of one composed race
pub const MAX_FRAMES_PER_RACE: usize = 1_000_000;

/// Compose all frames of a race at tick interval `tick_interval` seconds.
///
/// Drivers without samples stay in the roster as `not_started` on every
/// tick. Fails with [`ReplayError::NoTelemetry`] when no driver has a single
/// sample, since there is no span to replay, and with
/// [`ReplayError::InvalidParameter`] when `tick_interval` would need more than
/// [`MAX_FRAMES_PER_RACE`] frames.
pub fn compose(
    series: &[DriverSeries],
    tick_interval: f64,
    pit_anchor: Option<Position>,
) -> Result<FrameSequence, ReplayError> {
    if !(tick_interval.is_finite() && tick_interval > 0.0) {
        return Err(ReplayError::invalid(
            "tick_interval_s",
            format!("must be a positive number of seconds, got {}", tick_interval),
        ));
    }

    let mut ordered: Vec<&DriverSeries> = series.iter().collect();
    ordered.sort_by(|a, b| a.driver().cmp(b.driver()));
    ordered.dedup_by(|later, earlier| {
        let dup = later.driver() == earlier.driver();
        if dup {
            log::warn!("Duplicate series for driver {}, keeping the first", later.driver());
        }
        dup
    });

    let start = ordered
        .iter()
        .filter_map(|s| s.start_time())
        .min_by(f64::total_cmp);
    let end = ordered
        .iter()
        .filter_map(|s| s.end_time())
        .max_by(f64::total_cmp);
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => return Err(ReplayError::NoTelemetry),
    };

    let ticks = ((end - start).max(0.0) / tick_interval + TICK_EPSILON).floor() + 1.0;
    if ticks > MAX_FRAMES_PER_RACE as f64 {
        return Err(ReplayError::invalid(
            "tick_interval_s",
            format!(
                "{}s over a {:.1}s race needs more than {} frames",
                tick_interval,
                end - start,
                MAX_FRAMES_PER_RACE
            ),
        ));
    }

    let clock = TickClock::spanning(start, end, tick_interval);
    log::debug!(
        "Composing {} drivers over {:.2}s..{:.2}s ({} ticks of {}s)",
        ordered.len(),
        start,
        end,
        clock.len,
        tick_interval
    );

    let columns: Vec<Vec<CarState>> = ordered
        .par_iter()
        .map(|s| resample(s, &clock, pit_anchor))
        .collect();

    let mut columns: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
    let frames: Vec<Frame> = (0..clock.len)
        .map(|k| Frame {
            t: clock.time_at(k),
            cars: columns.iter_mut().filter_map(Iterator::next).collect(),
        })
        .collect();

    let bounds = Bounds::of(
        ordered
            .iter()
            .flat_map(|s| s.samples().iter().map(|sample| sample.position())),
    );
    let drivers = ordered.iter().map(|s| s.driver().clone()).collect();

    Ok(FrameSequence::new(clock, drivers, frames, bounds))
}
