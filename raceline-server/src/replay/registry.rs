use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use raceline_core::{DriverCode, FrameSequence, RaceId, ReplayError};

use super::session::{ReplaySession, SessionId};

/// Active replay sessions, keyed by session id.
///
/// Every session gets a child of the registry's cancellation token and its
/// emission task runs on the registry's task tracker, so [`shutdown`]
/// can stop them all and wait for them to finish.
///
/// [`shutdown`]: SessionRegistry::shutdown
pub struct SessionRegistry {
    max_sessions_per_race: usize,
    sessions: RwLock<HashMap<SessionId, Arc<ReplaySession>>>,
    next_id: AtomicU64,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl SessionRegistry {
    pub fn new(max_sessions_per_race: usize) -> Self {
        SessionRegistry {
            max_sessions_per_race,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Fail early if `race` has no room for another session
    pub fn ensure_capacity(&self, race: &RaceId) -> Result<(), ReplayError> {
        if self.root.is_cancelled() {
            return Err(ReplayError::Cancelled);
        }
        self.check_capacity(&self.read(), race)
    }

    /// Register a new idle session and start its emission task.
    pub fn create(
        &self,
        race: &RaceId,
        frames: Arc<FrameSequence>,
        drivers: Option<HashSet<DriverCode>>,
        speed: f64,
    ) -> Result<Arc<ReplaySession>, ReplayError> {
        let mut sessions = self.write();
        // Checked under the write lock, shutdown cancels before draining
        if self.root.is_cancelled() {
            return Err(ReplayError::Cancelled);
        }
        self.check_capacity(&sessions, race)?;

        let id = format!("replay-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(ReplaySession::new(
            id.clone(),
            race.clone(),
            frames,
            drivers,
            speed,
            self.root.child_token(),
        )?);
        self.tracker.spawn(session.clone().run());
        sessions.insert(id.clone(), session.clone());
        info!("{}: opened for race {}", id, race);
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Result<Arc<ReplaySession>, ReplayError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| ReplayError::NoSuchSession(id.to_string()))
    }

    /// Close and forget a session. Closing an unknown or already closed
    /// session is not an error; returns whether anything was closed.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.write().remove(id);
        match removed {
            Some(session) => session.close(),
            None => {
                debug!("{}: close of unknown session ignored", id);
                false
            }
        }
    }

    /// Number of sessions of `race` that are not closed
    pub fn active_sessions(&self, race: &RaceId) -> usize {
        count_active(&self.read(), race)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session and wait until all emission tasks have stopped.
    /// No session can be created afterwards.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<ReplaySession>> = {
            let mut sessions = self.write();
            self.root.cancel();
            sessions.drain().map(|(_, session)| session).collect()
        };
        info!("Shutting down {} replay sessions", drained.len());
        for session in drained {
            session.close();
        }
        self.tracker.close();
        self.tracker.wait().await;
        debug!("All replay emission tasks stopped");
    }

    fn check_capacity(
        &self,
        sessions: &HashMap<SessionId, Arc<ReplaySession>>,
        race: &RaceId,
    ) -> Result<(), ReplayError> {
        if count_active(sessions, race) >= self.max_sessions_per_race {
            return Err(ReplayError::ResourceExhausted {
                race: race.to_string(),
                limit: self.max_sessions_per_race,
            });
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<ReplaySession>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<ReplaySession>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn count_active(sessions: &HashMap<SessionId, Arc<ReplaySession>>, race: &RaceId) -> usize {
    sessions
        .values()
        .filter(|s| s.race_id() == race && !s.is_closed())
        .count()
}
