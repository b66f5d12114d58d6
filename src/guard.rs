//! Submission guard
//!
//! The single gate between a finished session and a persisted submission.
//! It owns the at-most-one-attempt invariant: the duplicate pre-check and
//! the insert run inside a per-(exam, candidate) critical section, and the
//! store's atomic insert-if-absent backstops whatever races past it.
//! Errors are returned before any state mutation; the only side effect of
//! a successful call is the persisted record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AttemptError, WindowViolation};
use crate::grading::grade;
use crate::model::{
    CandidateId, ExamId, Identity, Role, SubmissionReceipt, SubmitRequest, VerdictMap,
    WindowState,
};
use crate::runner::{collect_verdicts, CodeRunner};
use crate::store::{ExamDirectory, InsertOutcome, NewSubmission, QuestionBank, SubmissionStore};

type AttemptKey = (ExamId, CandidateId);

pub struct SubmissionGuard {
    exams: Arc<dyn ExamDirectory>,
    bank: Arc<dyn QuestionBank>,
    store: Arc<dyn SubmissionStore>,
    /// Per-attempt locks serializing the check-then-insert window
    locks: Mutex<HashMap<AttemptKey, Arc<Mutex<()>>>>,
}

impl SubmissionGuard {
    pub fn new(
        exams: Arc<dyn ExamDirectory>,
        bank: Arc<dyn QuestionBank>,
        store: Arc<dyn SubmissionStore>,
    ) -> Self {
        Self {
            exams,
            bank,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and persist one attempt, grading it on the way through.
    ///
    /// The code verdict map is produced by the runner before this call;
    /// see `evaluate_and_submit` for the variant that collects it.
    pub async fn submit(
        &self,
        identity: Option<Identity>,
        request: SubmitRequest,
        verdicts: &VerdictMap,
    ) -> Result<SubmissionReceipt, AttemptError> {
        self.submit_at(Utc::now(), identity, request, verdicts).await
    }

    /// Collect code verdicts with the given runner, then submit.
    ///
    /// Exams without answered CODE questions never touch the runner, so a
    /// missing sandbox backend cannot fail an MCQ-only attempt.
    pub async fn evaluate_and_submit(
        &self,
        identity: Option<Identity>,
        request: SubmitRequest,
        runner: &dyn CodeRunner,
    ) -> Result<SubmissionReceipt, AttemptError> {
        let candidate = require_candidate(identity)?;
        let questions = self.bank.questions_for(request.exam_id).await?;
        let evaluation = collect_verdicts(runner, &questions, &request.answers)
            .await
            .map_err(AttemptError::Environment)?;
        self.submit_at(
            Utc::now(),
            Some(Identity::candidate(candidate)),
            request,
            &evaluation.verdicts,
        )
        .await
    }

    async fn submit_at(
        &self,
        now: DateTime<Utc>,
        identity: Option<Identity>,
        request: SubmitRequest,
        verdicts: &VerdictMap,
    ) -> Result<SubmissionReceipt, AttemptError> {
        let candidate = require_candidate(identity)?;
        let exam_id = request.exam_id;

        let exam = self
            .exams
            .exam(exam_id)
            .await?
            .ok_or(AttemptError::ExamNotFound(exam_id))?;

        // check-then-insert is one critical section per attempt key
        let key_lock = self.attempt_lock((exam_id, candidate)).await;
        let _held = key_lock.lock().await;

        if self.store.find(exam_id, candidate).await?.is_some() {
            warn!(exam = exam_id, candidate, "duplicate attempt rejected");
            return Err(AttemptError::DuplicateAttempt);
        }

        match exam.window_state(now) {
            WindowState::Open => {}
            WindowState::NotYetOpen => {
                return Err(AttemptError::ExamNotActive(WindowViolation::NotYetOpen))
            }
            WindowState::Closed => {
                return Err(AttemptError::ExamNotActive(WindowViolation::Closed))
            }
        }

        let questions = self.bank.questions_for(exam_id).await?;
        let outcome = grade(&questions, &request.answers, verdicts, exam.negative_marking);

        let inserted = self
            .store
            .insert_if_absent(NewSubmission {
                exam_id,
                candidate_id: candidate,
                score: outcome.score,
                total_score: outcome.total_score,
                percentage: outcome.percentage,
                answers: request.answers,
                tab_switch_count: request.tab_switch_count,
                time_spent_secs: request.time_spent_secs,
                completed_at: now,
            })
            .await?;

        let submission = match inserted {
            InsertOutcome::Inserted(submission) => submission,
            // lost a race the per-key lock could not see (e.g. another node)
            InsertOutcome::AlreadyExists => return Err(AttemptError::DuplicateAttempt),
        };

        info!(
            exam = exam_id,
            candidate,
            submission = submission.id,
            score = submission.score,
            total = submission.total_score,
            "submission persisted"
        );

        Ok(SubmissionReceipt {
            submission_id: submission.id,
            score: submission.score,
            total_score: submission.total_score,
            percentage: submission.percentage,
        })
    }

    async fn attempt_lock(&self, key: AttemptKey) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(key)
            .or_default()
            .clone()
    }
}

fn require_candidate(identity: Option<Identity>) -> Result<CandidateId, AttemptError> {
    match identity {
        Some(Identity {
            candidate_id,
            role: Role::Candidate,
        }) => Ok(candidate_id),
        _ => Err(AttemptError::Unauthorized),
    }
}
