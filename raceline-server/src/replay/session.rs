//! One replay session: a [`PlaybackCursor`] driven by a paced emission task,
//! publishing into a latest-value slot that a single subscriber drains.

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use raceline_core::{
    Command, DriverCode, Frame, FrameSequence, PlaybackCursor, PlaybackStatus, RaceId,
    ReplayError, SessionState, Step,
};

pub type SessionId = String;

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReplayEvent {
    Frame(Arc<Frame>),
    /// The last frame of the race has been sent; the session is paused
    EndOfRace,
    /// The session was closed. Always the last event of a stream.
    Closed,
}

pub type FrameStream = BoxStream<'static, ReplayEvent>;

/// Latest-value slot between the emission task and the subscriber
#[derive(Debug, Default)]
struct Slot {
    /// Bumped for every published frame
    frame_seq: u64,
    frame: Option<Arc<Frame>>,
    /// Set when the end-of-race marker follows `frame`
    end_of_race: bool,
}

#[derive(Debug)]
pub struct ReplaySession {
    id: SessionId,
    race_id: RaceId,
    frames: Arc<FrameSequence>,
    drivers: Option<HashSet<DriverCode>>,
    cursor: Mutex<PlaybackCursor>,
    /// Wakes the emission task after a command
    wake: Notify,
    slot: watch::Sender<Slot>,
    subscribed: AtomicBool,
    token: CancellationToken,
    opened_at: DateTime<Utc>,
}

impl ReplaySession {
    pub(crate) fn new(
        id: SessionId,
        race_id: RaceId,
        frames: Arc<FrameSequence>,
        drivers: Option<HashSet<DriverCode>>,
        speed: f64,
        token: CancellationToken,
    ) -> Result<Self, ReplayError> {
        let cursor = PlaybackCursor::new(*frames.clock(), speed)?;
        let (slot, _) = watch::channel(Slot::default());
        Ok(ReplaySession {
            id,
            race_id,
            frames,
            drivers,
            cursor: Mutex::new(cursor),
            wake: Notify::new(),
            slot,
            subscribed: AtomicBool::new(false),
            token,
            opened_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn race_id(&self) -> &RaceId {
        &self.race_id
    }

    pub fn frames(&self) -> &Arc<FrameSequence> {
        &self.frames
    }

    pub fn drivers(&self) -> Option<&HashSet<DriverCode>> {
        self.drivers.as_ref()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.cursor().state().is_closed()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.cursor().status()
    }

    /// Apply a client command. A rejected command leaves the session as it was.
    pub fn control(&self, command: &Command) -> Result<PlaybackStatus, ReplayError> {
        let status = {
            let mut cursor = self.cursor();
            cursor.apply(command)?;
            cursor.status()
        };
        debug!("{}: {} -> {}", self.id, command.name(), status.state);
        if status.state.is_closed() {
            self.token.cancel();
        }
        self.wake.notify_one();
        Ok(status)
    }

    /// Close the session and stop its emission task. Returns false if it was
    /// already closed.
    pub fn close(&self) -> bool {
        let was_open = self.cursor().close();
        self.token.cancel();
        if was_open {
            info!("{}: closed", self.id);
        }
        was_open
    }

    /// Take the session's one and only frame stream
    pub fn subscribe(&self) -> Result<FrameStream, ReplayError> {
        if self.is_closed() {
            return Err(ReplayError::InvalidState {
                operation: "subscribe",
                state: SessionState::Closed,
            });
        }
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(ReplayError::AlreadySubscribed(self.id.clone()));
        }

        let subscriber = Subscriber {
            rx: self.slot.subscribe(),
            token: self.token.clone(),
            seen_frame_seq: 0,
            pending: None,
            done: false,
        };
        Ok(stream::unfold(subscriber, Subscriber::next).boxed())
    }

    fn cursor(&self) -> MutexGuard<'_, PlaybackCursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_frame(&self, index: usize) {
        let Some(frame) = self.frames.get(index) else {
            return;
        };
        let frame = match &self.drivers {
            Some(drivers) => frame.only(drivers),
            None => frame.clone(),
        };
        trace!("{}: frame {} at t={:.3}", self.id, index, frame.t);
        self.slot.send_modify(|slot| {
            slot.frame_seq += 1;
            slot.frame = Some(Arc::new(frame));
            slot.end_of_race = false;
        });
    }

    fn publish_end_of_race(&self) {
        debug!("{}: end of race", self.id);
        self.slot.send_modify(|slot| slot.end_of_race = true);
    }

    /// Emission loop. Runs until the session is closed or cancelled.
    pub(crate) async fn run(self: Arc<Self>) {
        debug!("{}: emission task started", self.id);
        loop {
            let step = self.cursor().next_step();
            match step {
                Step::Closed => break,
                Step::Hold => {
                    tokio::select! { biased;
                        _ = self.token.cancelled() => break,
                        _ = self.wake.notified() => {},
                    }
                }
                Step::Exhausted => self.publish_end_of_race(),
                Step::Emit { index, last } => {
                    let emitted_at = Instant::now();
                    self.publish_frame(index);
                    if last {
                        self.publish_end_of_race();
                        info!("{}: reached the end of the race", self.id);
                    } else if !self.pace(emitted_at, index + 1).await {
                        break;
                    }
                }
            }
        }
        debug!("{}: emission task stopped", self.id);
    }

    /// Sleep until the next frame is due. Speed changes stretch or shrink
    /// the current wait; any other command ends it early. Returns false when
    /// the session was cancelled.
    async fn pace(&self, emitted_at: Instant, next_index: usize) -> bool {
        loop {
            let interval = self.cursor().pacing_interval();
            tokio::select! { biased;
                _ = self.token.cancelled() => return false,
                _ = self.wake.notified() => {
                    let cursor = self.cursor();
                    if cursor.state() != SessionState::Playing || cursor.position() != next_index {
                        return true;
                    }
                },
                _ = tokio::time::sleep_until(emitted_at + interval) => return true,
            }
        }
    }
}

struct Subscriber {
    rx: watch::Receiver<Slot>,
    token: CancellationToken,
    seen_frame_seq: u64,
    /// End-of-race marker to deliver after the frame just yielded
    pending: Option<ReplayEvent>,
    done: bool,
}

impl Subscriber {
    async fn next(mut self) -> Option<(ReplayEvent, Self)> {
        if self.done {
            return None;
        }
        if let Some(event) = self.pending.take() {
            return Some((event, self));
        }
        loop {
            tokio::select! { biased;
                _ = self.token.cancelled() => {
                    self.done = true;
                    return Some((ReplayEvent::Closed, self));
                }
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        self.done = true;
                        return Some((ReplayEvent::Closed, self));
                    }
                    let (frame, end_of_race) = {
                        let slot = self.rx.borrow_and_update();
                        let fresh = slot.frame_seq > self.seen_frame_seq;
                        self.seen_frame_seq = slot.frame_seq;
                        (slot.frame.clone().filter(|_| fresh), slot.end_of_race)
                    };
                    match (frame, end_of_race) {
                        (Some(frame), true) => {
                            self.pending = Some(ReplayEvent::EndOfRace);
                            return Some((ReplayEvent::Frame(frame), self));
                        }
                        (Some(frame), false) => return Some((ReplayEvent::Frame(frame), self)),
                        (None, true) => return Some((ReplayEvent::EndOfRace, self)),
                        (None, false) => continue,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raceline_core::{compose, DriverSeries, TelemetrySample};
    use std::time::Duration;

    fn sample(time_s: f64) -> TelemetrySample {
        TelemetrySample {
            time_s,
            x: time_s,
            y: -time_s,
            speed_kph: 200.0,
            throttle_pct: 100.0,
            brake_applied: false,
            gear: 7,
            lap: 1,
        }
    }

    /// 11 frames, t = 0.0 ..= 1.0
    fn frames() -> Arc<FrameSequence> {
        let ver = DriverSeries::new("VER".into(), (0..=10).map(|i| sample(i as f64 * 0.1)));
        let ham = DriverSeries::new("HAM".into(), (0..=5).map(|i| sample(i as f64 * 0.1)));
        Arc::new(compose(&[ver, ham], 0.1, None).unwrap())
    }

    fn spawn_session(drivers: Option<HashSet<DriverCode>>) -> Arc<ReplaySession> {
        let session = Arc::new(
            ReplaySession::new(
                "replay-1".into(),
                "monza-2024".into(),
                frames(),
                drivers,
                1.0,
                CancellationToken::new(),
            )
            .unwrap(),
        );
        tokio::spawn(session.clone().run());
        session
    }

    fn frame_t(event: &ReplayEvent) -> f64 {
        match event {
            ReplayEvent::Frame(frame) => frame.t,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_to_end_of_race() {
        let session = spawn_session(None);
        let mut stream = session.subscribe().unwrap();
        session.control(&Command::Start).unwrap();

        let mut times = Vec::new();
        loop {
            match stream.next().await.unwrap() {
                ReplayEvent::Frame(frame) => times.push(frame.t),
                ReplayEvent::EndOfRace => break,
                ReplayEvent::Closed => panic!("closed early"),
            }
        }
        assert_eq!(times.len(), 11);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(session.status().state, SessionState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_follows_speed() {
        let session = spawn_session(None);
        let mut stream = session.subscribe().unwrap();
        session.control(&Command::Start).unwrap();

        stream.next().await.unwrap();
        let started = Instant::now();
        stream.next().await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(100) && waited < Duration::from_millis(102));

        session.control(&Command::SetSpeed { multiplier: 4.0 }).unwrap();
        stream.next().await.unwrap();
        let started = Instant::now();
        stream.next().await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(25) && waited < Duration::from_millis(27));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_continue_in_place() {
        let session = spawn_session(None);
        let mut stream = session.subscribe().unwrap();
        session.control(&Command::Start).unwrap();

        let first = frame_t(&stream.next().await.unwrap());
        let second = frame_t(&stream.next().await.unwrap());
        session.control(&Command::Pause).unwrap();

        // Nothing is emitted while paused
        let idle = tokio::time::timeout(Duration::from_secs(5), stream.next()).await;
        assert!(idle.is_err());

        session.control(&Command::Resume).unwrap();
        let third = frame_t(&stream.next().await.unwrap());
        assert_eq!((first, second), (0.0, 0.1));
        assert!((third - 0.2).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_jumps() {
        let session = spawn_session(None);
        let mut stream = session.subscribe().unwrap();
        session.control(&Command::Start).unwrap();
        stream.next().await.unwrap();

        session.control(&Command::Seek { t: 0.75 }).unwrap();
        let t = frame_t(&stream.next().await.unwrap());
        assert!((t - 0.7).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_terminates_stream_within_one_interval() {
        let session = spawn_session(None);
        let mut stream = session.subscribe().unwrap();
        session.control(&Command::Start).unwrap();
        stream.next().await.unwrap();

        let closing = Instant::now();
        assert!(session.close());
        assert_eq!(stream.next().await, Some(ReplayEvent::Closed));
        assert_eq!(stream.next().await, None);
        assert!(closing.elapsed() < Duration::from_millis(100));

        assert!(!session.close());
        assert!(session.control(&Command::Resume).is_err());
    }

    #[tokio::test]
    async fn test_single_subscriber() {
        let session = spawn_session(None);
        let _stream = session.subscribe().unwrap();
        assert!(matches!(
            session.subscribe(),
            Err(ReplayError::AlreadySubscribed(_))
        ));

        let other = spawn_session(None);
        other.close();
        assert!(matches!(
            other.subscribe(),
            Err(ReplayError::InvalidState {
                state: SessionState::Closed,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_filter() {
        let only_ham: HashSet<DriverCode> = ["HAM".into()].into_iter().collect();
        let session = spawn_session(Some(only_ham));
        let mut stream = session.subscribe().unwrap();
        session.control(&Command::Start).unwrap();
        match stream.next().await.unwrap() {
            ReplayEvent::Frame(frame) => {
                assert_eq!(frame.cars.len(), 1);
                assert_eq!(frame.cars[0].driver_code.as_str(), "HAM");
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_skips_to_latest() {
        let session = spawn_session(None);
        let mut stream = session.subscribe().unwrap();
        session.control(&Command::Start).unwrap();
        stream.next().await.unwrap();

        // Fall behind by several frames
        tokio::time::sleep(Duration::from_millis(450)).await;
        let t = frame_t(&stream.next().await.unwrap());
        assert!((t - 0.4).abs() < 1e-9, "t = {}", t);
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(ReplayEvent::EndOfRace).unwrap();
        assert_eq!(json, serde_json::json!({"type": "endOfRace"}));
        let frame = Frame { t: 1.5, cars: vec![] };
        let json = serde_json::to_value(ReplayEvent::Frame(Arc::new(frame))).unwrap();
        assert_eq!(json, serde_json::json!({"type": "frame", "t": 1.5, "cars": []}));
    }
}
