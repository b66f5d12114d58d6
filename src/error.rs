//! Attempt-error taxonomy surfaced to submission callers
//!
//! Execution faults inside the code runner are never errors here: they are
//! contained as failed test-case data. Integrity violations are counted
//! events, not errors. What remains is the small set of user-correctable
//! rejections plus the one fatal environment case.

use thiserror::Error;

/// Why an exam is not accepting submissions right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowViolation {
    NotYetOpen,
    Closed,
}

impl std::fmt::Display for WindowViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowViolation::NotYetOpen => write!(f, "exam has not started yet"),
            WindowViolation::Closed => write!(f, "exam has already ended"),
        }
    }
}

/// Typed rejection returned by the submission guard before any state
/// mutation takes place
#[derive(Debug, Error)]
pub enum AttemptError {
    /// A submission already exists for this (exam, candidate) pair
    #[error("exam was already attempted by this candidate")]
    DuplicateAttempt,

    /// Current time is outside the exam's scheduled window
    #[error("exam is not active: {0}")]
    ExamNotActive(WindowViolation),

    /// No verified candidate identity was supplied
    #[error("unauthorized: no verified candidate identity")]
    Unauthorized,

    /// The referenced exam does not exist in the directory
    #[error("exam {0} not found")]
    ExamNotFound(i64),

    /// The execution environment for CODE grading could not be provisioned.
    /// MCQ-only exams never hit this path.
    #[error("execution environment unavailable")]
    Environment(#[source] anyhow::Error),

    /// A collaborator (directory, bank, store) failed
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AttemptError {
    /// Whether the caller can correct this by changing its request
    pub fn is_user_correctable(&self) -> bool {
        !matches!(
            self,
            AttemptError::Environment(_) | AttemptError::Internal(_)
        )
    }
}
