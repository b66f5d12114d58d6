//! Session event loop
//!
//! Owns the one-second clock and serializes every producer - ticks,
//! integrity signals, candidate interaction - onto a single task, so the
//! state machine never sees concurrent events. State is published through
//! a watch channel; the channel closing when the driver returns is the
//! deterministic detach for every subscriber.

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::{ExamSession, SessionEvent, SessionOutcome, SessionSignal, SessionSnapshot};

/// Tick resolution of the remaining-time counter
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Buffered capacity for UI-originated events
const EVENT_BUFFER: usize = 64;

/// Client half: feed events in, observe snapshots
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Queue an event for the control loop. Returns false once the
    /// session has terminated and stopped receiving.
    pub async fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Subscribe to state snapshots; the stream ends when the session
    /// terminates
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }
}

/// Driver half: owns the session and the clock
pub struct SessionDriver {
    session: ExamSession,
    events: mpsc::Receiver<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionDriver {
    pub fn new(session: ExamSession) -> (Self, SessionHandle) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        (
            Self {
                session,
                events: event_rx,
                snapshots: snapshot_tx,
            },
            SessionHandle {
                events: event_tx,
                snapshots: snapshot_rx,
            },
        )
    }

    /// Run the control loop until a submission dispatches or every handle
    /// is dropped (session abandoned without submitting).
    ///
    /// On dispatch the session is terminated, a final snapshot is
    /// published, and the watch channel closes as the driver returns.
    pub async fn run(mut self) -> Option<SessionOutcome> {
        let mut ticker = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let signals = tokio::select! {
                _ = ticker.tick() => self.session.apply(SessionEvent::Tick),
                event = self.events.recv() => match event {
                    Some(event) => self.session.apply(event),
                    None => {
                        warn!("all session handles dropped, abandoning session");
                        self.session.terminate();
                        let _ = self.snapshots.send(self.session.snapshot());
                        return None;
                    }
                },
            };

            let mut outcome = None;
            for signal in signals {
                match signal {
                    SessionSignal::Warning { count, max } => {
                        info!(count, max, "integrity warning surfaced");
                    }
                    SessionSignal::Dispatch(dispatched) => outcome = Some(dispatched),
                }
            }

            if let Some(outcome) = outcome {
                self.session.terminate();
                let _ = self.snapshots.send(self.session.snapshot());
                return Some(outcome);
            }

            let _ = self.snapshots.send(self.session.snapshot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exam, Question, QuestionBody, SubmitRequest};
    use crate::session::{Phase, SubmitReason};
    use chrono::{TimeZone, Utc};

    fn exam(duration_minutes: u32) -> Exam {
        Exam {
            id: 1,
            title: "Driver test".into(),
            description: String::new(),
            duration_minutes,
            start_time: None,
            end_time: None,
            total_marks: 1,
            negative_marking: false,
            owner: 9,
        }
    }

    fn questions() -> Vec<Question> {
        vec![Question {
            id: 10,
            exam_id: 1,
            marks: 1,
            body: QuestionBody::Mcq {
                text: "pick".into(),
                options: vec!["a".into(), "b".into()],
                correct_option: 1,
            },
        }]
    }

    fn session(duration_minutes: u32) -> ExamSession {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        ExamSession::enter(&exam(duration_minutes), questions(), now).unwrap()
    }

    fn shrink_remaining(session: &mut ExamSession, secs: u64) {
        session.remaining_secs = secs;
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_expiry_auto_submits() {
        let mut exam_session = session(30);
        shrink_remaining(&mut exam_session, 3);

        let (driver, handle) = SessionDriver::new(exam_session);
        let driver_task = tokio::spawn(driver.run());

        let outcome = driver_task.await.unwrap().expect("must dispatch");
        assert_eq!(outcome.reason, SubmitReason::TimeExpired);
        assert_eq!(outcome.request.time_spent_secs, 3);

        // the session is gone: events are rejected, the final snapshot is
        // terminal
        assert!(!handle.send(SessionEvent::Tick).await);
        assert_eq!(handle.latest().phase, Phase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_submit_round_trip() {
        let (driver, handle) = SessionDriver::new(session(30));
        let driver_task = tokio::spawn(driver.run());

        assert!(
            handle
                .send(SessionEvent::SelectOption {
                    question: 10,
                    option: 1,
                })
                .await
        );
        assert!(handle.send(SessionEvent::OpenSubmitConfirm).await);
        assert!(handle.send(SessionEvent::ConfirmSubmit).await);

        let outcome = driver_task.await.unwrap().expect("must dispatch");
        assert_eq!(outcome.reason, SubmitReason::Manual);
        let SubmitRequest { answers, .. } = outcome.request;
        assert_eq!(answers.selected_option(10), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_violation_escalation_through_the_loop() {
        let (driver, handle) = SessionDriver::new(session(30));
        let driver_task = tokio::spawn(driver.run());

        for _ in 0..3 {
            assert!(handle.send(SessionEvent::FocusLost).await);
            assert!(handle.send(SessionEvent::FocusRestored).await);
            tokio::time::advance(super::super::VIOLATION_DEBOUNCE).await;
        }

        let outcome = driver_task.await.unwrap().expect("must dispatch");
        assert_eq!(outcome.reason, SubmitReason::IntegrityExceeded);
        assert_eq!(outcome.request.tab_switch_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_session_returns_none() {
        let (driver, handle) = SessionDriver::new(session(30));
        let driver_task = tokio::spawn(driver.run());
        drop(handle);
        assert!(driver_task.await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_channel_closes_on_termination() {
        let mut exam_session = session(30);
        shrink_remaining(&mut exam_session, 1);

        let (driver, handle) = SessionDriver::new(exam_session);
        let mut snapshots = handle.watch();
        let driver_task = tokio::spawn(driver.run());

        driver_task.await.unwrap();
        drop(handle);

        // drain whatever was published, then observe the closed channel
        while snapshots.changed().await.is_ok() {}
        assert_eq!(snapshots.borrow().phase, Phase::Terminated);
    }
}
