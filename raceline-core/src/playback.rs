//! Replay session state machine.
//!
//! ```text
//!            start            pause
//!   idle ───────────▶ playing ◀──────▶ paused
//!     │                  │     resume    │
//!     └──────────────────┴───────────────┴──▶ closed
//! ```
//!
//! [`PlaybackCursor`] owns the playback position and speed of one session and
//! decides, step by step, which frame the emission loop should send next.
//! It does no I/O and never sleeps; the server drives it and performs the
//! pacing sleep from [`PlaybackCursor::pacing_interval`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ReplayError;
use crate::frame::TickClock;

/// Upper bound on the wait between two frames, whatever the speed
pub const MAX_PACING_INTERVAL: Duration = Duration::from_secs(3600);

// =============================================================================
// Session State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Playing,
    Paused,
    /// Terminal
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Playing => write!(f, "playing"),
            SessionState::Paused => write!(f, "paused"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Client command, as received over the control endpoint or the frame socket.
///
/// Wire form: `{"command":"seek","t":812.5}`, `{"command":"setSpeed","multiplier":4}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    Start,
    Pause,
    Resume,
    Seek { t: f64 },
    SetSpeed { multiplier: f64 },
    Close,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Seek { .. } => "seek",
            Command::SetSpeed { .. } => "setSpeed",
            Command::Close => "close",
        }
    }
}

/// What the emission loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send frame `index`. `last` is set on the final frame of the race, after
    /// which the cursor has already moved to paused.
    Emit { index: usize, last: bool },
    /// Resumed with nothing left to play: re-send the end-of-race marker.
    /// The cursor is paused again.
    Exhausted,
    /// Idle or paused, wait for a command
    Hold,
    Closed,
}

/// Snapshot of a session's playback, as reported by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub state: SessionState,
    /// Next frame to be emitted (clamped to the last frame once exhausted)
    pub position_index: usize,
    pub frame_count: usize,
    /// Race time of `position_index`
    pub current_time: f64,
    pub speed_multiplier: f64,
}

// =============================================================================
// Playback Cursor
// =============================================================================

#[derive(Debug, Clone)]
pub struct PlaybackCursor {
    clock: TickClock,
    state: SessionState,
    /// Next frame index to emit, `clock.len` once every frame has been sent
    position: usize,
    speed: f64,
}

impl PlaybackCursor {
    pub fn new(clock: TickClock, speed: f64) -> Result<Self, ReplayError> {
        validate_speed(speed)?;
        Ok(PlaybackCursor {
            clock,
            state: SessionState::Idle,
            position: 0,
            speed,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn start(&mut self) -> Result<(), ReplayError> {
        self.require("start", &[SessionState::Idle])?;
        self.position = 0;
        self.state = SessionState::Playing;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), ReplayError> {
        self.require("pause", &[SessionState::Playing, SessionState::Paused])?;
        self.state = SessionState::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ReplayError> {
        self.require("resume", &[SessionState::Playing, SessionState::Paused])?;
        self.state = SessionState::Playing;
        Ok(())
    }

    /// Jump to the tick at or before `t`, clamped into the race. Returns the
    /// new position.
    pub fn seek(&mut self, t: f64) -> Result<usize, ReplayError> {
        self.require("seek", &[SessionState::Playing, SessionState::Paused])?;
        if t.is_nan() {
            return Err(ReplayError::invalid("t", "must be a number"));
        }
        self.position = self.clock.index_at_or_before(t);
        Ok(self.position)
    }

    pub fn set_speed(&mut self, multiplier: f64) -> Result<(), ReplayError> {
        if self.state.is_closed() {
            return Err(ReplayError::InvalidState {
                operation: "setSpeed",
                state: self.state,
            });
        }
        validate_speed(multiplier)?;
        self.speed = multiplier;
        Ok(())
    }

    /// Returns false if the cursor was already closed
    pub fn close(&mut self) -> bool {
        let was_open = !self.state.is_closed();
        self.state = SessionState::Closed;
        was_open
    }

    pub fn apply(&mut self, command: &Command) -> Result<(), ReplayError> {
        match *command {
            Command::Start => self.start(),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Seek { t } => self.seek(t).map(|_| ()),
            Command::SetSpeed { multiplier } => self.set_speed(multiplier),
            Command::Close => {
                self.close();
                Ok(())
            }
        }
    }

    /// Advance the cursor by one emission step.
    pub fn next_step(&mut self) -> Step {
        match self.state {
            SessionState::Closed => Step::Closed,
            SessionState::Idle | SessionState::Paused => Step::Hold,
            SessionState::Playing if self.position >= self.clock.len => {
                self.state = SessionState::Paused;
                Step::Exhausted
            }
            SessionState::Playing => {
                let index = self.position;
                self.position += 1;
                let last = self.position >= self.clock.len;
                if last {
                    self.state = SessionState::Paused;
                }
                Step::Emit { index, last }
            }
        }
    }

    /// Wall-clock time between two emitted frames: `Δt / speed`, capped at
    /// [`MAX_PACING_INTERVAL`]
    pub fn pacing_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.clock.tick_interval / self.speed)
            .map_or(MAX_PACING_INTERVAL, |d| d.min(MAX_PACING_INTERVAL))
    }

    pub fn status(&self) -> PlaybackStatus {
        let position_index = self.position.min(self.clock.len.saturating_sub(1));
        PlaybackStatus {
            state: self.state,
            position_index,
            frame_count: self.clock.len,
            current_time: self.clock.time_at(position_index),
            speed_multiplier: self.speed,
        }
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), ReplayError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ReplayError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

fn validate_speed(multiplier: f64) -> Result<(), ReplayError> {
    if multiplier.is_finite() && multiplier > 0.0 {
        Ok(())
    } else {
        Err(ReplayError::invalid(
            "multiplier",
            format!("must be a positive finite number, got {}", multiplier),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(len: usize) -> PlaybackCursor {
        let clock = TickClock {
            t0: 100.0,
            tick_interval: 0.5,
            len,
        };
        PlaybackCursor::new(clock, 1.0).unwrap()
    }

    fn drain(c: &mut PlaybackCursor) -> Vec<usize> {
        let mut out = Vec::new();
        while let Step::Emit { index, .. } = c.next_step() {
            out.push(index);
        }
        out
    }

    #[test]
    fn test_plays_every_frame_then_pauses() {
        let mut c = cursor(4);
        assert_eq!(c.next_step(), Step::Hold);
        c.start().unwrap();
        assert_eq!(c.next_step(), Step::Emit { index: 0, last: false });
        assert_eq!(c.next_step(), Step::Emit { index: 1, last: false });
        assert_eq!(c.next_step(), Step::Emit { index: 2, last: false });
        assert_eq!(c.next_step(), Step::Emit { index: 3, last: true });
        assert_eq!(c.state(), SessionState::Paused);
        assert_eq!(c.next_step(), Step::Hold);
    }

    #[test]
    fn test_resume_when_exhausted() {
        let mut c = cursor(2);
        c.start().unwrap();
        assert_eq!(drain(&mut c), vec![0, 1]);
        c.resume().unwrap();
        assert_eq!(c.next_step(), Step::Exhausted);
        assert_eq!(c.state(), SessionState::Paused);

        // Seeking back makes the session playable again
        c.seek(100.0).unwrap();
        c.resume().unwrap();
        assert_eq!(drain(&mut c), vec![0, 1]);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut c = cursor(3);
        for r in [c.clone().pause(), c.clone().resume(), c.clone().seek(1.0).map(|_| ())] {
            assert!(matches!(
                r,
                Err(ReplayError::InvalidState {
                    state: SessionState::Idle,
                    ..
                })
            ));
        }

        c.start().unwrap();
        assert!(c.start().is_err());
        assert_eq!(c.state(), SessionState::Playing);

        c.close();
        assert!(c.start().is_err());
        assert!(c.resume().is_err());
        assert!(c.set_speed(2.0).is_err());
        assert_eq!(c.next_step(), Step::Closed);
    }

    #[test]
    fn test_pause_resume_keeps_position() {
        let mut c = cursor(10);
        c.start().unwrap();
        c.next_step();
        c.next_step();
        c.pause().unwrap();
        c.pause().unwrap();
        assert_eq!(c.next_step(), Step::Hold);
        c.resume().unwrap();
        c.resume().unwrap();
        assert_eq!(c.next_step(), Step::Emit { index: 2, last: false });
    }

    #[test]
    fn test_seek_clamps() {
        let mut c = cursor(10);
        c.start().unwrap();
        assert_eq!(c.seek(-50.0).unwrap(), 0);
        assert_eq!(c.seek(101.2).unwrap(), 2);
        assert_eq!(c.seek(1e6).unwrap(), 9);
        assert_eq!(c.next_step(), Step::Emit { index: 9, last: true });
        assert!(c.seek(f64::NAN).is_err());
        assert_eq!(c.position(), 10);
    }

    #[test]
    fn test_set_speed() {
        let mut c = cursor(10);
        assert_eq!(c.pacing_interval(), Duration::from_millis(500));
        c.set_speed(4.0).unwrap();
        assert_eq!(c.pacing_interval(), Duration::from_millis(125));
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                c.set_speed(bad),
                Err(ReplayError::InvalidParameter { .. })
            ));
        }
        assert_eq!(c.speed(), 4.0);

        c.set_speed(1e-300).unwrap();
        assert_eq!(c.pacing_interval(), MAX_PACING_INTERVAL);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut c = cursor(3);
        assert!(c.close());
        assert!(!c.close());
        assert!(c.apply(&Command::Close).is_ok());
    }

    #[test]
    fn test_status() {
        let mut c = cursor(3);
        c.start().unwrap();
        drain(&mut c);
        let status = c.status();
        assert_eq!(status.state, SessionState::Paused);
        assert_eq!(status.position_index, 2);
        assert_eq!(status.current_time, 101.0);
        assert_eq!(status.frame_count, 3);
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(r#"{"command":"setSpeed","multiplier":2.5}"#).unwrap();
        assert_eq!(cmd, Command::SetSpeed { multiplier: 2.5 });
        let cmd: Command = serde_json::from_str(r#"{"command":"pause"}"#).unwrap();
        assert_eq!(cmd, Command::Pause);
        assert_eq!(
            serde_json::to_string(&Command::Seek { t: 3.0 }).unwrap(),
            r#"{"command":"seek","t":3.0}"#
        );
    }
}
