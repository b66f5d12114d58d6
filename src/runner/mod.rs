//! Runner module - Execution abstraction layer
//!
//! This module provides the interface for executing candidate-submitted
//! programs against hidden test cases:
//! - `CodeRunner`: trait so the isolation mechanism (subprocess, container,
//!   WASM) is swappable without touching grading logic
//! - `ProcessRunner`: subprocess implementation with per-case wall-clock
//!   timeouts
//!
//! The runner module does NOT:
//! - Award marks or apply grading policy
//! - Know about exams, sessions or submissions
//! - Surface per-case faults as errors (they are reported as data)

pub mod process;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{AnswerSheet, Question, QuestionBody, QuestionId, TestCase, VerdictMap};

/// Outcome of running one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub passed: bool,
    /// Fault text for timeouts and runtime errors, preserved for feedback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of running a candidate program against all of a question's
/// test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// True iff every case passed; this is what the grading engine consults
    pub all_passed: bool,
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    pub fn from_cases(cases: Vec<CaseReport>) -> Self {
        Self {
            all_passed: cases.iter().all(|c| c.passed),
            cases,
        }
    }
}

/// Execution abstraction for candidate code.
///
/// Implementations contain every per-case fault (timeout, crash, stderr
/// noise) as a failed `CaseReport`; `Err` is reserved for failing to
/// provision an execution environment at all.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(
        &self,
        language: &str,
        source: &str,
        cases: &[TestCase],
    ) -> anyhow::Result<RunReport>;
}

/// Verdicts plus the detailed per-case reports behind them
#[derive(Debug, Default)]
pub struct CodeEvaluation {
    pub verdicts: VerdictMap,
    pub reports: HashMap<QuestionId, RunReport>,
}

/// Run every answered CODE question sequentially and summarize the results
/// into the verdict map the grading engine consumes.
///
/// Unanswered CODE questions get a `false` verdict without spawning
/// anything, and exams without answered CODE questions never touch the
/// runner, so MCQ-only grading cannot fail on runner availability.
pub async fn collect_verdicts(
    runner: &dyn CodeRunner,
    questions: &[Question],
    answers: &AnswerSheet,
) -> anyhow::Result<CodeEvaluation> {
    let mut evaluation = CodeEvaluation::default();

    for question in questions {
        let QuestionBody::Code {
            language,
            test_cases,
            ..
        } = &question.body
        else {
            continue;
        };

        let Some(source) = answers.source(question.id) else {
            evaluation.verdicts.insert(question.id, false);
            continue;
        };

        let report = runner.run(language, source, test_cases).await?;
        debug!(
            question = question.id,
            all_passed = report.all_passed,
            cases = report.cases.len(),
            "evaluated code answer"
        );
        evaluation.verdicts.insert(question.id, report.all_passed);
        evaluation.reports.insert(question.id, report);
    }

    Ok(evaluation)
}

/// Compare program output with expected output
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

/// Normalize output for comparison: unify line endings, trim trailing
/// whitespace per line, and drop leading/trailing blank lines. Exact-byte
/// comparison would fail candidates over a trailing newline.
fn normalize_output(output: &str) -> Vec<String> {
    let mut lines: Vec<String> = output
        .replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end().to_string())
        .collect();

    while lines.last().map(|s| s.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    while lines.first().map(|s| s.is_empty()).unwrap_or(false) {
        lines.remove(0);
    }
    lines
}

// Re-exports
pub use process::ProcessRunner;
