//! Grading engine
//!
//! Pure scoring over a finalized answer payload: no I/O, no clock, no
//! mutation of anything it is handed. Re-running it over the same inputs
//! always reproduces the same outcome, which is what makes audit re-grading
//! possible.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Answer, AnswerSheet, Question, QuestionBody, VerdictMap};

/// Fixed penalty for a wrong MCQ selection under negative marking,
/// independent of the question's own mark value
const WRONG_MCQ_PENALTY: i64 = 1;

/// Result of grading one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub score: u32,
    pub total_score: u32,
    /// `100 * score / total_score`, rounded to two decimals; 0 for an
    /// empty bank
    pub percentage: f64,
}

/// Score a finalized answer payload against the exam's question bank.
///
/// MCQ answers are compared against the stored correct option; CODE
/// questions earn their marks only when the verdict map records a full
/// pass. Blank answers are never penalized, and an answer of the wrong
/// kind for its question counts as unanswered rather than an error.
pub fn grade(
    questions: &[Question],
    answers: &AnswerSheet,
    verdicts: &VerdictMap,
    negative_marking: bool,
) -> GradeOutcome {
    let mut score: i64 = 0;
    let mut total_score: u32 = 0;

    for question in questions {
        total_score += question.marks;

        match &question.body {
            QuestionBody::Mcq { correct_option, .. } => {
                match answers.get(question.id) {
                    Some(Answer::Choice(selected)) => {
                        if selected == correct_option {
                            score += i64::from(question.marks);
                        } else if negative_marking {
                            score -= WRONG_MCQ_PENALTY;
                        }
                    }
                    // blank or a non-choice payload: no credit, no penalty
                    Some(Answer::Source(_)) | None => {}
                }
            }
            QuestionBody::Code { .. } => {
                // all-or-nothing: marks only for a full pass
                if verdicts.get(&question.id).copied().unwrap_or(false) {
                    score += i64::from(question.marks);
                }
            }
        }
    }

    // negative marking must never take the total below zero
    let score = score.max(0) as u32;

    let percentage = if total_score > 0 {
        round2(f64::from(score) * 100.0 / f64::from(total_score))
    } else {
        0.0
    };

    debug!(score, total_score, percentage, "graded submission");

    GradeOutcome {
        score,
        total_score,
        percentage,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
