//! Review read path
//!
//! Reconstructs per-question review data for a graded submission. This is
//! a pure transformation over already-persisted data: nothing here
//! re-grades or mutates anything.

use serde::{Deserialize, Serialize};

use crate::model::{Question, QuestionBody, QuestionId, Submission, TestCase};

/// What a candidate sees for one question when reviewing their attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "question_type")]
pub enum QuestionReview {
    #[serde(rename = "MCQ")]
    Mcq {
        question_id: QuestionId,
        text: String,
        options: Vec<String>,
        correct_option: usize,
        /// What the candidate picked, if anything
        selected_option: Option<usize>,
        is_correct: bool,
    },
    #[serde(rename = "CODE")]
    Code {
        question_id: QuestionId,
        prompt: String,
        test_cases: Vec<TestCase>,
        submitted_code: Option<String>,
    },
}

/// Attach each question's stored answer to its correctness data for
/// display
pub fn build_review(questions: &[Question], submission: &Submission) -> Vec<QuestionReview> {
    questions
        .iter()
        .map(|question| match &question.body {
            QuestionBody::Mcq {
                text,
                options,
                correct_option,
            } => {
                let selected = submission.answers.selected_option(question.id);
                QuestionReview::Mcq {
                    question_id: question.id,
                    text: text.clone(),
                    options: options.clone(),
                    correct_option: *correct_option,
                    selected_option: selected,
                    is_correct: selected == Some(*correct_option),
                }
            }
            QuestionBody::Code {
                prompt, test_cases, ..
            } => QuestionReview::Code {
                question_id: question.id,
                prompt: prompt.clone(),
                test_cases: test_cases.clone(),
                submitted_code: submission.answers.source(question.id).map(str::to_string),
            },
        })
        .collect()
}
