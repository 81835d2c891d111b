//! Error types for the replay pipeline

use thiserror::Error;

use crate::playback::SessionState;

/// Coarse classification of a [`ReplayError`].
///
/// The delivery layer maps these onto its own status codes; callers that
/// only need to decide "retry or not" can match on the kind instead of the
/// individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidParameter,
    InvalidState,
    ResourceExhausted,
    Cancelled,
    Upstream,
}

/// Errors that can occur while building or replaying a race
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayError {
    /// Race is unknown to storage
    #[error("No such race '{0}'")]
    NoSuchRace(String),

    /// Driver is unknown for the given race
    #[error("No such driver '{driver}' in race '{race}'")]
    NoSuchDriver { race: String, driver: String },

    /// Race has no reference lap to draw the track from
    #[error("No reference lap for race '{0}'")]
    NoReferenceLap(String),

    /// Replay session id is unknown (or already closed and released)
    #[error("No such replay session '{0}'")]
    NoSuchSession(String),

    /// None of the drivers of a race has a single telemetry sample
    #[error("Race has no telemetry samples")]
    NoTelemetry,

    /// A configuration or command value is out of range
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Operation is not legal in the current session state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Only one subscription per session
    #[error("Replay session '{0}' already has a subscriber")]
    AlreadySubscribed(String),

    /// Concurrent session cap for a race reached
    #[error("Race '{race}' already has {limit} active replay sessions")]
    ResourceExhausted { race: String, limit: usize },

    /// Session closed (or registry shut down) mid-operation
    #[error("Replay session closed")]
    Cancelled,

    /// Storage or runtime failure the pipeline does not interpret
    #[error("Upstream failure: {0}")]
    Upstream(String),
}

impl ReplayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplayError::NoSuchRace(_)
            | ReplayError::NoSuchDriver { .. }
            | ReplayError::NoReferenceLap(_)
            | ReplayError::NoSuchSession(_)
            | ReplayError::NoTelemetry => ErrorKind::NotFound,
            ReplayError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            ReplayError::InvalidState { .. } | ReplayError::AlreadySubscribed(_) => {
                ErrorKind::InvalidState
            }
            ReplayError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            ReplayError::Cancelled => ErrorKind::Cancelled,
            ReplayError::Upstream(_) => ErrorKind::Upstream,
        }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ReplayError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ReplayError {
    fn from(e: serde_json::Error) -> Self {
        ReplayError::Upstream(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            ReplayError::NoSuchSession("replay-1".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(ReplayError::NoTelemetry.kind(), ErrorKind::NotFound);
        assert_eq!(
            ReplayError::AlreadySubscribed("replay-1".into()).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            ReplayError::invalid("speed", "must be positive").kind(),
            ErrorKind::InvalidParameter
        );
    }

    #[test]
    fn test_messages() {
        let e = ReplayError::InvalidState {
            operation: "pause",
            state: SessionState::Idle,
        };
        assert_eq!(e.to_string(), "Cannot pause while idle");

        let e = ReplayError::ResourceExhausted {
            race: "monza-2024".into(),
            limit: 4,
        };
        assert_eq!(
            e.to_string(),
            "Race 'monza-2024' already has 4 active replay sessions"
        );
    }
}
