//! Live replay sessions.
//!
//! ```text
//!  TelemetryStore ──▶ BuildCache<FrameSequence> ──▶ ReplaySession ──▶ FrameStream
//!                     BuildCache<TrackShape>        (emission task)    (one subscriber)
//! ```
//!
//! [`ReplayService`] is the entry point. It composes a race once per tick
//! interval, hands the shared frames to each new [`ReplaySession`], and keeps
//! the sessions in a [`SessionRegistry`] that bounds them per race and stops
//! them all on shutdown.

mod registry;
mod service;
mod session;

pub use registry::SessionRegistry;
pub use service::{ReplayInfo, ReplayService, SessionStatus};
pub use session::{FrameStream, ReplayEvent, ReplaySession, SessionId};
