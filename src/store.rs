//! Collaborator boundary for durable state
//!
//! The engine does not pick a persistence technology. It talks to three
//! narrow traits and requires exactly one non-trivial capability: an atomic
//! insert-if-absent for submissions keyed by (exam, candidate). `MemoryStore`
//! is the reference implementation used by tests and embedders that bring
//! their own durability.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::model::{
    AnswerSheet, CandidateId, Exam, ExamId, Question, Submission, SubmissionId,
};

/// Read access to exam definitions
#[async_trait]
pub trait ExamDirectory: Send + Sync {
    async fn exam(&self, id: ExamId) -> anyhow::Result<Option<Exam>>;
}

/// Read access to the ordered question list of an exam
#[async_trait]
pub trait QuestionBank: Send + Sync {
    async fn questions_for(&self, exam: ExamId) -> anyhow::Result<Vec<Question>>;
}

/// A submission record before the store has assigned its id
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub exam_id: ExamId,
    pub candidate_id: CandidateId,
    pub score: u32,
    pub total_score: u32,
    pub percentage: f64,
    pub answers: AnswerSheet,
    pub tab_switch_count: u32,
    pub time_spent_secs: u32,
    pub completed_at: DateTime<Utc>,
}

impl NewSubmission {
    fn into_submission(self, id: SubmissionId) -> Submission {
        Submission {
            id,
            exam_id: self.exam_id,
            candidate_id: self.candidate_id,
            score: self.score,
            total_score: self.total_score,
            percentage: self.percentage,
            answers: self.answers,
            tab_switch_count: self.tab_switch_count,
            time_spent_secs: self.time_spent_secs,
            completed_at: self.completed_at,
        }
    }
}

/// Result of an atomic insert attempt
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Submission),
    /// A submission for this (exam, candidate) pair already exists
    AlreadyExists,
}

/// Durable store for submissions
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn find(
        &self,
        exam: ExamId,
        candidate: CandidateId,
    ) -> anyhow::Result<Option<Submission>>;

    /// Insert unless a record for the same (exam, candidate) pair exists.
    /// The check and the insert are one atomic step.
    async fn insert_if_absent(&self, submission: NewSubmission) -> anyhow::Result<InsertOutcome>;
}

/// In-memory implementation of all three collaborator traits
#[derive(Default)]
pub struct MemoryStore {
    exams: Mutex<HashMap<ExamId, Exam>>,
    questions: Mutex<HashMap<ExamId, Vec<Question>>>,
    submissions: Mutex<HashMap<(ExamId, CandidateId), Submission>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Register an exam together with its question bank
    pub async fn put_exam(&self, exam: Exam, questions: Vec<Question>) {
        let exam_id = exam.id;
        self.exams.lock().await.insert(exam_id, exam);
        self.questions.lock().await.insert(exam_id, questions);
    }

    pub async fn submission_count(&self) -> usize {
        self.submissions.lock().await.len()
    }
}

#[async_trait]
impl ExamDirectory for MemoryStore {
    async fn exam(&self, id: ExamId) -> anyhow::Result<Option<Exam>> {
        Ok(self.exams.lock().await.get(&id).cloned())
    }
}

#[async_trait]
impl QuestionBank for MemoryStore {
    async fn questions_for(&self, exam: ExamId) -> anyhow::Result<Vec<Question>> {
        Ok(self
            .questions
            .lock()
            .await
            .get(&exam)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn find(
        &self,
        exam: ExamId,
        candidate: CandidateId,
    ) -> anyhow::Result<Option<Submission>> {
        Ok(self
            .submissions
            .lock()
            .await
            .get(&(exam, candidate))
            .cloned())
    }

    async fn insert_if_absent(&self, submission: NewSubmission) -> anyhow::Result<InsertOutcome> {
        let key = (submission.exam_id, submission.candidate_id);
        let mut submissions = self.submissions.lock().await;
        if submissions.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = submission.into_submission(id);
        submissions.insert(key, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }
}
