//! # Raceline Core
//!
//! Platform-independent telemetry resampling and replay logic.
//!
//! This crate contains the pure, synchronous part of the replay pipeline with
//! **zero I/O dependencies**: given per-driver telemetry it produces the
//! frames a replay streams, the decimated track outline, and the playback
//! state machine that decides which frame goes out next.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  raceline-core (no tokio/async deps)                        │
//! │  ├── telemetry/  (samples, series, identifiers, bounds)     │
//! │  ├── resample/   (irregular series -> one state per tick)   │
//! │  ├── compose/    (per-driver columns -> FrameSequence)      │
//! │  ├── track/      (reference lap -> decimated TrackShape)    │
//! │  └── playback/   (session state machine, commands)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  raceline-server        │
//!                 │  (storage, sessions,    │
//!                 │   HTTP/WebSocket)       │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Key Modules
//!
//! - [`telemetry`] - Input samples and per-driver series
//! - [`frame`] - Frames, car status and the tick clock
//! - [`resample`] - Linear interpolation onto the tick clock
//! - [`compose`] - Parallel composition of a whole race
//! - [`track`] - Fixed-stride track outline reduction
//! - [`playback`] - Replay session state machine
//! - [`config`] - Service defaults and per-replay options
//!
//! ## Example: Composing a Race
//!
//! ```rust
//! use raceline_core::{compose, DriverSeries, TelemetrySample, CarStatus};
//!
//! let sample = |t: f64| TelemetrySample {
//!     time_s: t,
//!     x: t * 10.0,
//!     y: 0.0,
//!     speed_kph: 200.0,
//!     throttle_pct: 100.0,
//!     brake_applied: false,
//!     gear: 7,
//!     lap: 1,
//! };
//! let ver = DriverSeries::new("VER".into(), (0..=4).map(|i| sample(i as f64)));
//! let ham = DriverSeries::new("HAM".into(), (2..=6).map(|i| sample(i as f64)));
//!
//! let frames = compose(&[ver, ham], 0.5, None).unwrap();
//! assert_eq!(frames.len(), 13);
//!
//! let first = frames.get(0).unwrap();
//! assert_eq!(first.cars[0].driver_code.as_str(), "HAM");
//! assert_eq!(first.cars[0].status, CarStatus::NotStarted);
//! ```
//!
//! ## Example: Driving Playback
//!
//! ```rust
//! use raceline_core::{PlaybackCursor, SessionState, Step, TickClock};
//!
//! let clock = TickClock::spanning(0.0, 1.0, 0.5);
//! let mut cursor = PlaybackCursor::new(clock, 1.0).unwrap();
//! cursor.start().unwrap();
//!
//! assert_eq!(cursor.next_step(), Step::Emit { index: 0, last: false });
//! assert_eq!(cursor.next_step(), Step::Emit { index: 1, last: false });
//! assert_eq!(cursor.next_step(), Step::Emit { index: 2, last: true });
//! assert_eq!(cursor.state(), SessionState::Paused);
//! ```

pub mod compose;
pub mod config;
pub mod error;
pub mod frame;
pub mod playback;
pub mod resample;
pub mod telemetry;
pub mod track;

// Re-export commonly used types
pub use compose::compose;
pub use config::{ReplayConfig, ReplayOptions, ResolvedOptions};
pub use error::{ErrorKind, ReplayError};
pub use frame::{CarState, CarStatus, Frame, FrameSequence, TickClock};
pub use playback::{Command, PlaybackCursor, PlaybackStatus, SessionState, Step};
pub use resample::{resample, Resampler};
pub use telemetry::{Bounds, DriverCode, DriverSeries, Position, RaceId, TelemetrySample};
pub use track::{decimate, TrackPoint, TrackShape};
