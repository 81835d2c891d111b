//! Telemetry resampling
//!
//! Converts one driver's irregular series into one [`CarState`] per tick of a
//! [`TickClock`]. Position and speed are linearly interpolated between the
//! two samples that bracket the tick; lap and gear are discrete and take the
//! value of the sample at or before the tick.
//!
//! The bracket only ever moves forward, so resampling a whole clock costs
//! `O(ticks + samples)`.

use crate::frame::{CarState, CarStatus, TickClock};
use crate::telemetry::{DriverSeries, Position, TelemetrySample};

/// Forward-scanning sampler over one [`DriverSeries`]
#[derive(Debug)]
pub struct Resampler<'a> {
    series: &'a DriverSeries,
    pit_anchor: Option<Position>,
    /// Index of the sample at or before the last requested time
    cursor: usize,
}

impl<'a> Resampler<'a> {
    /// `pit_anchor` is where a car waits before its first sample. Without
    /// one the car is held at its first sample (or the origin for a driver
    /// with no samples at all).
    pub fn new(series: &'a DriverSeries, pit_anchor: Option<Position>) -> Self {
        Resampler {
            series,
            pit_anchor,
            cursor: 0,
        }
    }

    /// Car state at time `t`.
    ///
    /// Calls are expected with non-decreasing `t`; an earlier `t` restarts the
    /// scan from the first sample.
    pub fn sample_at(&mut self, t: f64) -> CarState {
        let samples = self.series.samples();
        let (first, last) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                let anchor = self.pit_anchor.unwrap_or_default();
                return self.held(anchor, 0, 0, CarStatus::NotStarted);
            }
        };

        if t < first.time_s {
            let anchor = self.pit_anchor.unwrap_or(first.position());
            return self.held(anchor, first.lap, 0, CarStatus::NotStarted);
        }
        if t > last.time_s {
            return self.held(last.position(), last.lap, last.gear, CarStatus::Finished);
        }

        if t < samples[self.cursor].time_s {
            self.cursor = 0;
        }
        while self.cursor + 1 < samples.len() && samples[self.cursor + 1].time_s <= t {
            self.cursor += 1;
        }

        let a = &samples[self.cursor];
        match samples.get(self.cursor + 1) {
            Some(b) if t > a.time_s => self.interpolated(a, b, t),
            _ => self.exact(a),
        }
    }

    fn held(&self, p: Position, lap: u32, gear: i32, status: CarStatus) -> CarState {
        CarState {
            driver_code: self.series.driver().clone(),
            x: p.x,
            y: p.y,
            speed_kph: 0.0,
            lap,
            gear,
            status,
        }
    }

    fn exact(&self, s: &TelemetrySample) -> CarState {
        CarState {
            driver_code: self.series.driver().clone(),
            x: s.x,
            y: s.y,
            speed_kph: s.speed_kph,
            lap: s.lap,
            gear: s.gear,
            status: CarStatus::Active,
        }
    }

    fn interpolated(&self, a: &TelemetrySample, b: &TelemetrySample, t: f64) -> CarState {
        let f = (t - a.time_s) / (b.time_s - a.time_s);
        CarState {
            driver_code: self.series.driver().clone(),
            x: lerp(a.x, b.x, f),
            y: lerp(a.y, b.y, f),
            speed_kph: lerp(a.speed_kph, b.speed_kph, f),
            lap: a.lap,
            gear: a.gear,
            status: CarStatus::Active,
        }
    }
}

fn lerp(a: f64, b: f64, f: f64) -> f64 {
    a + (b - a) * f
}

/// Resample a whole series onto `clock`, one state per tick
pub fn resample(
    series: &DriverSeries,
    clock: &TickClock,
    pit_anchor: Option<Position>,
) -> Vec<CarState> {
    let mut sampler = Resampler::new(series, pit_anchor);
    (0..clock.len)
        .map(|k| sampler.sample_at(clock.time_at(k)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sample(time_s: f64, x: f64, speed_kph: f64, lap: u32, gear: i32) -> TelemetrySample {
        TelemetrySample {
            time_s,
            x,
            y: x * 2.0,
            speed_kph,
            throttle_pct: 0.0,
            brake_applied: false,
            gear,
            lap,
        }
    }

    fn series() -> DriverSeries {
        DriverSeries::new(
            "LEC".into(),
            vec![
                make_sample(0.0, 0.0, 100.0, 1, 3),
                make_sample(2.0, 10.0, 200.0, 1, 4),
                make_sample(3.0, 12.0, 150.0, 2, 5),
            ],
        )
    }

    #[test]
    fn test_interpolates_between_samples() {
        let s = series();
        let mut r = Resampler::new(&s, None);

        let c = r.sample_at(0.5);
        assert_eq!(c.status, CarStatus::Active);
        assert!((c.x - 2.5).abs() < 1e-12);
        assert!((c.y - 5.0).abs() < 1e-12);
        assert!((c.speed_kph - 125.0).abs() < 1e-12);
        // Discrete channels step, they are not interpolated
        assert_eq!(c.gear, 3);
        assert_eq!(c.lap, 1);

        let c = r.sample_at(2.5);
        assert!((c.x - 11.0).abs() < 1e-12);
        assert_eq!(c.lap, 1);
        assert_eq!(c.gear, 4);
    }

    #[test]
    fn test_exact_sample_time() {
        let s = series();
        let mut r = Resampler::new(&s, None);
        for sample in s.samples() {
            let c = r.sample_at(sample.time_s);
            assert_eq!(c.x, sample.x);
            assert_eq!(c.y, sample.y);
            assert_eq!(c.speed_kph, sample.speed_kph);
            assert_eq!(c.lap, sample.lap);
            assert_eq!(c.status, CarStatus::Active);
        }
    }

    #[test]
    fn test_before_and_after_span() {
        let s = DriverSeries::new(
            "LEC".into(),
            vec![make_sample(5.0, 1.0, 90.0, 1, 2), make_sample(6.0, 3.0, 95.0, 1, 2)],
        );
        let mut r = Resampler::new(&s, None);

        let c = r.sample_at(4.0);
        assert_eq!(c.status, CarStatus::NotStarted);
        assert_eq!(c.x, 1.0);
        assert_eq!(c.speed_kph, 0.0);

        let c = r.sample_at(7.0);
        assert_eq!(c.status, CarStatus::Finished);
        assert_eq!(c.x, 3.0);
        assert_eq!(c.y, 6.0);
    }

    #[test]
    fn test_pit_anchor() {
        let s = series();
        let mut r = Resampler::new(&s, Some(Position::new(-1.0, -2.0)));
        let c = r.sample_at(-1.0);
        assert_eq!(c.status, CarStatus::NotStarted);
        assert_eq!((c.x, c.y), (-1.0, -2.0));
    }

    #[test]
    fn test_single_sample_is_constant() {
        let s = DriverSeries::new("BOT".into(), vec![make_sample(1.0, 4.0, 80.0, 3, 2)]);
        let mut r = Resampler::new(&s, None);
        assert_eq!(r.sample_at(0.0).status, CarStatus::NotStarted);
        let c = r.sample_at(1.0);
        assert_eq!(c.status, CarStatus::Active);
        assert_eq!(c.x, 4.0);
        assert_eq!(r.sample_at(1.5).status, CarStatus::Finished);
    }

    #[test]
    fn test_empty_series_never_starts() {
        let s = DriverSeries::empty("SAR".into());
        let clock = TickClock::spanning(0.0, 3.0, 1.0);
        let states = resample(&s, &clock, None);
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|c| c.status == CarStatus::NotStarted));
        assert!(states.iter().all(|c| c.x == 0.0 && c.y == 0.0));
    }

    #[test]
    fn test_backwards_time_rescans() {
        let s = series();
        let mut r = Resampler::new(&s, None);
        r.sample_at(2.9);
        let c = r.sample_at(0.5);
        assert!((c.x - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_resample_clock() {
        let s = series();
        let clock = TickClock::spanning(0.0, 3.0, 0.5);
        let states = resample(&s, &clock, None);
        let xs: Vec<f64> = states.iter().map(|c| c.x).collect();
        assert_eq!(xs, vec![0.0, 2.5, 5.0, 7.5, 10.0, 11.0, 12.0]);
    }
}
