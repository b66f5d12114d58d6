//! Core entities for exams, questions, answers and submissions
//!
//! Everything here is plain data: identities are `i64` like every other
//! wire-facing id in the system, and all types serialize with serde so they
//! can cross the boundary to collaborators unchanged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ExamId = i64;
pub type QuestionId = i64;
pub type CandidateId = i64;
pub type SubmissionId = i64;

/// Role attached to a verified identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Candidate,
    Examiner,
}

/// Verified identity supplied by the identity collaborator.
///
/// The engine never inspects credentials; it only requires that a verified
/// pair exists before a submission is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub candidate_id: CandidateId,
    pub role: Role,
}

impl Identity {
    pub fn candidate(candidate_id: CandidateId) -> Self {
        Self {
            candidate_id,
            role: Role::Candidate,
        }
    }
}

/// Position of `now` relative to an exam's scheduled window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// No schedule configured, or now is inside the window
    Open,
    NotYetOpen,
    Closed,
}

/// An exam definition as supplied by the question-bank/persistence side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: ExamId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Nominal duration in minutes
    pub duration_minutes: u32,
    /// Scheduled window start (sessions may not be created before this)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Scheduled window end (clamps the effective duration)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub total_marks: u32,
    /// Wrong MCQ answers cost one point when set
    pub negative_marking: bool,
    /// Owning examiner
    pub owner: i64,
}

impl Exam {
    /// Where `now` falls relative to the scheduled window.
    ///
    /// Exams without a schedule are always open.
    pub fn window_state(&self, now: DateTime<Utc>) -> WindowState {
        if let Some(start) = self.start_time {
            if now < start {
                return WindowState::NotYetOpen;
            }
        }
        if let Some(end) = self.end_time {
            if now > end {
                return WindowState::Closed;
            }
        }
        WindowState::Open
    }

    /// Allowed session length in seconds: the nominal duration, clamped by
    /// whatever remains of the scheduled window.
    pub fn effective_duration_secs(&self, now: DateTime<Utc>) -> u64 {
        let nominal = u64::from(self.duration_minutes) * 60;
        match self.end_time {
            Some(end) if end > now => {
                let left = (end - now).num_seconds().max(0) as u64;
                nominal.min(left)
            }
            Some(_) => 0,
            None => nominal,
        }
    }
}

/// One hidden test case for a CODE question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// Question body, tagged the way the bank stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "question_type")]
pub enum QuestionBody {
    #[serde(rename = "MCQ")]
    Mcq {
        text: String,
        options: Vec<String>,
        /// Zero-based index into `options`
        correct_option: usize,
    },
    #[serde(rename = "CODE")]
    Code {
        prompt: String,
        #[serde(default)]
        input_format: String,
        #[serde(default)]
        output_format: String,
        #[serde(default)]
        sample_input: String,
        #[serde(default)]
        sample_output: String,
        /// Language profile name, see `config::LanguageProfile`
        #[serde(default = "default_language")]
        language: String,
        test_cases: Vec<TestCase>,
    },
}

fn default_language() -> String {
    "python".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub exam_id: ExamId,
    pub marks: u32,
    #[serde(flatten)]
    pub body: QuestionBody,
}

impl Question {
    pub fn is_code(&self) -> bool {
        matches!(self.body, QuestionBody::Code { .. })
    }
}

/// Distribute an examiner-supplied total evenly across `count` questions.
///
/// The remainder goes to the last question so the marks always sum to the
/// total.
pub fn distribute_marks(total_marks: u32, count: usize) -> Vec<u32> {
    if count == 0 {
        return Vec::new();
    }
    let count_u32 = count as u32;
    let each = total_marks / count_u32;
    let remainder = total_marks % count_u32;
    let mut marks = vec![each; count];
    if let Some(last) = marks.last_mut() {
        *last += remainder;
    }
    marks
}

/// A single captured answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    /// Selected option index for an MCQ question
    Choice(usize),
    /// Submitted source for a CODE question
    Source(String),
}

/// Canonical answer payload: question id to captured answer.
///
/// Clients address answers sometimes by numeric id and sometimes by its
/// string form; `from_json` is the single place where that gets normalized.
/// Grading and review only ever see `QuestionId` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSheet(HashMap<QuestionId, Answer>);

impl AnswerSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a loosely-keyed JSON object into the canonical map.
    ///
    /// Keys may be JSON numbers or string-typed ids; values are an option
    /// index (MCQ) or source text (CODE). Entries that fit neither form are
    /// dropped and treated as unanswered downstream.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut sheet = HashMap::new();
        let Some(object) = value.as_object() else {
            return Self(sheet);
        };
        for (key, raw) in object {
            let Ok(question_id) = key.trim().parse::<QuestionId>() else {
                continue;
            };
            let answer = match raw {
                serde_json::Value::Number(n) => match n.as_u64() {
                    Some(idx) => Answer::Choice(idx as usize),
                    None => continue,
                },
                serde_json::Value::String(code) => Answer::Source(code.clone()),
                _ => continue,
            };
            sheet.insert(question_id, answer);
        }
        Self(sheet)
    }

    pub fn select(&mut self, question: QuestionId, option: usize) {
        self.0.insert(question, Answer::Choice(option));
    }

    pub fn write_source(&mut self, question: QuestionId, source: String) {
        self.0.insert(question, Answer::Source(source));
    }

    pub fn get(&self, question: QuestionId) -> Option<&Answer> {
        self.0.get(&question)
    }

    pub fn selected_option(&self, question: QuestionId) -> Option<usize> {
        match self.0.get(&question) {
            Some(Answer::Choice(idx)) => Some(*idx),
            _ => None,
        }
    }

    pub fn source(&self, question: QuestionId) -> Option<&str> {
        match self.0.get(&question) {
            Some(Answer::Source(code)) => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QuestionId, &Answer)> {
        self.0.iter()
    }
}

/// Per-CODE-question "all test cases passed" summary, produced by the
/// runner before the guard is called
pub type VerdictMap = HashMap<QuestionId, bool>;

/// The persisted record of one attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub exam_id: ExamId,
    pub candidate_id: CandidateId,
    pub score: u32,
    pub total_score: u32,
    pub percentage: f64,
    /// Retained for the review read path
    pub answers: AnswerSheet,
    pub tab_switch_count: u32,
    pub time_spent_secs: u32,
    pub completed_at: DateTime<Utc>,
}

/// Payload the session hands to the submission guard on termination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub exam_id: ExamId,
    pub answers: AnswerSheet,
    pub tab_switch_count: u32,
    pub time_spent_secs: u32,
}

/// Successful response from the guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub submission_id: SubmissionId,
    pub score: u32,
    pub total_score: u32,
    pub percentage: f64,
}
