//! Proctored session state machine
//!
//! One owned state object per candidate taking an exam. Every input -
//! timer ticks, integrity signals, answer edits, the submit action - is
//! funneled through `apply` on a single control loop (see `driver`), so
//! exactly one terminal transition can ever happen. The machine itself is
//! synchronous; the driver owns the clock.
//!
//! Phases: `Lobby -> Active -> Submitting -> Terminated`. While active,
//! two orthogonal flags track the secure presentation context and
//! foreground visibility; losing either obscures content and disables
//! interaction until restored, while the timer and violation monitor stay
//! armed.

pub mod driver;

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::WindowViolation;
use crate::model::{AnswerSheet, Exam, ExamId, Question, QuestionId, SubmitRequest, WindowState};

/// Counted violations that force an automatic submission
pub const MAX_WARNINGS: u32 = 3;

/// A single user action can fire several underlying signals; only one
/// violation is counted per window
pub const VIOLATION_DEBOUNCE: Duration = Duration::from_secs(2);

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Active,
    Submitting,
    Terminated,
}

/// What triggered the submission dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    /// Candidate confirmed the two-step manual submit
    Manual,
    /// Remaining time reached zero
    TimeExpired,
    /// Violation count reached `MAX_WARNINGS`
    IntegrityExceeded,
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One-second timer tick from the driver
    Tick,
    /// The exclusive full-viewport context was lost
    SecureContextLost,
    SecureContextRestored,
    /// The session lost foreground visibility
    FocusLost,
    FocusRestored,
    SelectOption { question: QuestionId, option: usize },
    EditCode { question: QuestionId, source: String },
    /// Pure UI annotation, no grading effect
    ToggleReviewFlag(QuestionId),
    GoToQuestion(usize),
    NextQuestion,
    PreviousQuestion,
    /// First step of manual submission
    OpenSubmitConfirm,
    CancelSubmitConfirm,
    /// Second step; dispatches if the confirmation is open
    ConfirmSubmit,
}

/// Outputs the driver reacts to
#[derive(Debug)]
pub enum SessionSignal {
    /// A violation was counted; surface `count/max` to the candidate
    Warning { count: u32, max: u32 },
    /// The one and only submission dispatch
    Dispatch(SessionOutcome),
}

/// Final payload handed to the submission guard
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub reason: SubmitReason,
    pub request: SubmitRequest,
}

/// Why a candidate could not enter the exam
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("exam is not active: {0}")]
    NotActive(WindowViolation),
    #[error("exam has no questions")]
    EmptyQuestionBank,
}

/// Read-only view published after every applied event.
///
/// UI fragments subscribe to this through the driver's watch channel; the
/// channel closing is the detach signal on termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub current_index: usize,
    pub question_count: usize,
    pub remaining_secs: u64,
    pub elapsed_secs: u64,
    pub violations: u32,
    pub max_warnings: u32,
    /// Content must be obscured and interaction ignored while set
    pub insecure: bool,
    pub answered_count: usize,
    pub flagged: Vec<QuestionId>,
    pub confirm_open: bool,
}

/// The per-candidate session state machine
#[derive(Debug)]
pub struct ExamSession {
    exam_id: ExamId,
    questions: Vec<Question>,
    phase: Phase,
    current_index: usize,
    answers: AnswerSheet,
    flagged: HashSet<QuestionId>,
    remaining_secs: u64,
    elapsed_secs: u64,
    violations: u32,
    last_counted_violation: Option<Instant>,
    secure_context: bool,
    foreground: bool,
    confirm_open: bool,
    dispatched: bool,
}

impl ExamSession {
    /// Enter the exam: the candidate has just granted the secure
    /// presentation context, the question bank is fetched, and the
    /// remaining-time counter starts at the effective duration.
    pub fn enter(
        exam: &Exam,
        questions: Vec<Question>,
        now: DateTime<Utc>,
    ) -> Result<Self, EntryError> {
        match exam.window_state(now) {
            WindowState::Open => {}
            WindowState::NotYetOpen => {
                return Err(EntryError::NotActive(WindowViolation::NotYetOpen))
            }
            WindowState::Closed => return Err(EntryError::NotActive(WindowViolation::Closed)),
        }
        if questions.is_empty() {
            return Err(EntryError::EmptyQuestionBank);
        }

        let remaining_secs = exam.effective_duration_secs(now);
        info!(
            exam = exam.id,
            questions = questions.len(),
            remaining_secs,
            "session entered"
        );

        Ok(Self {
            exam_id: exam.id,
            questions,
            phase: Phase::Active,
            current_index: 0,
            answers: AnswerSheet::new(),
            flagged: HashSet::new(),
            remaining_secs,
            elapsed_secs: 0,
            violations: 0,
            last_counted_violation: None,
            secure_context: true,
            foreground: true,
            confirm_open: false,
            dispatched: false,
        })
    }

    /// True while the secure context or foreground visibility is lost;
    /// content is obscured and interaction is dead until restored
    pub fn insecure(&self) -> bool {
        !self.secure_context || !self.foreground
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The question to render, or None while the context is lost
    /// (content is obscured until the secure context is restored)
    pub fn visible_question(&self) -> Option<&Question> {
        if self.insecure() || self.phase != Phase::Active {
            return None;
        }
        self.questions.get(self.current_index)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            current_index: self.current_index,
            question_count: self.questions.len(),
            remaining_secs: self.remaining_secs,
            elapsed_secs: self.elapsed_secs,
            violations: self.violations,
            max_warnings: MAX_WARNINGS,
            insecure: self.insecure(),
            answered_count: self.answers.len(),
            flagged: self.flagged.iter().copied().collect(),
            confirm_open: self.confirm_open,
        }
    }

    /// Apply one event. All producers are serialized onto the driver's
    /// loop, so this is the only place state changes.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<SessionSignal> {
        if self.phase != Phase::Active {
            return Vec::new();
        }

        match event {
            SessionEvent::Tick => self.on_tick(),
            SessionEvent::SecureContextLost => {
                self.secure_context = false;
                self.on_violation("secure context lost")
            }
            SessionEvent::SecureContextRestored => {
                self.secure_context = true;
                Vec::new()
            }
            SessionEvent::FocusLost => {
                self.foreground = false;
                self.on_violation("focus lost")
            }
            SessionEvent::FocusRestored => {
                self.foreground = true;
                Vec::new()
            }
            // everything below is candidate interaction, dead while insecure
            _ if self.insecure() => Vec::new(),
            SessionEvent::SelectOption { question, option } => {
                if self.question_exists(question) {
                    self.answers.select(question, option);
                }
                Vec::new()
            }
            SessionEvent::EditCode { question, source } => {
                if self.question_exists(question) {
                    self.answers.write_source(question, source);
                }
                Vec::new()
            }
            SessionEvent::ToggleReviewFlag(question) => {
                if !self.flagged.remove(&question) && self.question_exists(question) {
                    self.flagged.insert(question);
                }
                Vec::new()
            }
            SessionEvent::GoToQuestion(index) => {
                if index < self.questions.len() {
                    self.current_index = index;
                }
                Vec::new()
            }
            SessionEvent::NextQuestion => {
                if self.current_index + 1 < self.questions.len() {
                    self.current_index += 1;
                }
                Vec::new()
            }
            SessionEvent::PreviousQuestion => {
                self.current_index = self.current_index.saturating_sub(1);
                Vec::new()
            }
            SessionEvent::OpenSubmitConfirm => {
                self.confirm_open = true;
                Vec::new()
            }
            SessionEvent::CancelSubmitConfirm => {
                self.confirm_open = false;
                Vec::new()
            }
            SessionEvent::ConfirmSubmit => {
                if self.confirm_open {
                    self.dispatch(SubmitReason::Manual)
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Stop the clock and monitoring, release the secure context. Called
    /// by the driver once the dispatch has been handed off; the session is
    /// not resumable afterwards.
    pub fn terminate(&mut self) {
        self.phase = Phase::Terminated;
        self.secure_context = false;
        self.confirm_open = false;
        info!(exam = self.exam_id, "session terminated");
    }

    fn question_exists(&self, question: QuestionId) -> bool {
        self.questions.iter().any(|q| q.id == question)
    }

    fn on_tick(&mut self) -> Vec<SessionSignal> {
        if self.dispatched {
            return Vec::new();
        }
        self.elapsed_secs += 1;
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            debug!(exam = self.exam_id, "time expired");
            return self.dispatch(SubmitReason::TimeExpired);
        }
        Vec::new()
    }

    fn on_violation(&mut self, kind: &str) -> Vec<SessionSignal> {
        // monitoring is disabled once a submission is in flight
        if self.dispatched {
            return Vec::new();
        }

        let now = Instant::now();
        if let Some(last) = self.last_counted_violation {
            if now.duration_since(last) < VIOLATION_DEBOUNCE {
                debug!(kind, "violation signal inside debounce window, not counted");
                return Vec::new();
            }
        }

        self.last_counted_violation = Some(now);
        self.violations += 1;
        warn!(
            exam = self.exam_id,
            kind,
            count = self.violations,
            max = MAX_WARNINGS,
            "integrity violation"
        );

        let mut signals = vec![SessionSignal::Warning {
            count: self.violations,
            max: MAX_WARNINGS,
        }];
        if self.violations >= MAX_WARNINGS {
            signals.extend(self.dispatch(SubmitReason::IntegrityExceeded));
        }
        signals
    }

    /// Only the first submission attempt reaches the guard; every later
    /// path is a no-op.
    fn dispatch(&mut self, reason: SubmitReason) -> Vec<SessionSignal> {
        if self.dispatched {
            return Vec::new();
        }
        self.dispatched = true;
        self.phase = Phase::Submitting;

        info!(
            exam = self.exam_id,
            ?reason,
            answered = self.answers.len(),
            violations = self.violations,
            elapsed_secs = self.elapsed_secs,
            "dispatching submission"
        );

        vec![SessionSignal::Dispatch(SessionOutcome {
            reason,
            request: SubmitRequest {
                exam_id: self.exam_id,
                answers: self.answers.clone(),
                tab_switch_count: self.violations,
                time_spent_secs: self.elapsed_secs as u32,
            },
        })]
    }
}
