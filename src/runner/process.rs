//! Subprocess runner implementation
//!
//! Hosts the candidate's source in a temp file and runs one independent
//! process per test case, with the case input on stdin and a wall-clock
//! timeout around the whole invocation. The temp file is owned by a
//! `tempfile` guard, so it is removed on every exit path - success,
//! failure or timeout.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{outputs_match, CaseReport, CodeRunner, RunReport};
use crate::config::{EngineConfig, LanguageProfile, MAX_CAPTURED_OUTPUT_BYTES};
use crate::model::TestCase;

/// Fault annotation for a case that exceeded its wall-clock budget
pub const TIMEOUT_ANNOTATION: &str = "Execution failed / timeout";

/// Runner that executes candidate programs as plain subprocesses
pub struct ProcessRunner {
    config: EngineConfig,
}

impl ProcessRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn case_timeout(&self) -> Duration {
        Duration::from_millis(self.config.case_timeout_ms)
    }

    /// Run one test case as an independent process invocation
    async fn run_case(
        &self,
        profile: &LanguageProfile,
        source_path: &str,
        case: &TestCase,
    ) -> CaseReport {
        let failed = |actual: String, error: String| CaseReport {
            input: case.input.clone(),
            expected_output: case.expected_output.clone(),
            actual_output: actual,
            passed: false,
            error: Some(error),
        };

        let argv = substitute_source(&profile.run_command, source_path);
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return failed(String::new(), "Empty run command".to_string()),
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn candidate process: {}", e);
                return failed(String::new(), format!("Execution failed: {}", e));
            }
        };

        // A program that never reads stdin may close it early; that is the
        // candidate's business, not a runner fault.
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(case.input.as_bytes()).await;
        }

        let output = match tokio::time::timeout(self.case_timeout(), child.wait_with_output()).await
        {
            Err(_) => {
                debug!("Candidate process exceeded {:?}", self.case_timeout());
                return failed(String::new(), TIMEOUT_ANNOTATION.to_string());
            }
            Ok(Err(e)) => {
                return failed(String::new(), format!("Execution failed: {}", e));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = truncate_output(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate_output(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let detail = if stderr.is_empty() {
                format!("Process exited with code {}", code)
            } else {
                stderr
            };
            return failed(stdout, detail);
        }

        if !stderr.trim().is_empty() {
            return failed(stdout, stderr);
        }

        let passed = outputs_match(&stdout, &case.expected_output);
        CaseReport {
            input: case.input.clone(),
            expected_output: case.expected_output.clone(),
            actual_output: stdout,
            passed,
            error: None,
        }
    }
}

#[async_trait]
impl CodeRunner for ProcessRunner {
    async fn run(
        &self,
        language: &str,
        source: &str,
        cases: &[TestCase],
    ) -> Result<RunReport> {
        let profile = self
            .config
            .language(language)
            .with_context(|| format!("No execution profile for language: {}", language))?
            .clone();

        // Provisioning the source file is the one fatal path: without it
        // there is no execution environment at all.
        let source_file = tempfile::Builder::new()
            .prefix("candidate-")
            .suffix(&profile.source_suffix)
            .tempfile()
            .context("Failed to create temp file for candidate source")?;
        std::fs::write(source_file.path(), source)
            .context("Failed to write candidate source")?;

        let source_path = source_file.path().to_string_lossy().to_string();
        debug!(
            path = %source_path,
            cases = cases.len(),
            "running candidate program"
        );

        let mut reports = Vec::with_capacity(cases.len());
        for case in cases {
            reports.push(self.run_case(&profile, &source_path, case).await);
        }

        Ok(RunReport::from_cases(reports))
    }
}

/// Replace the `{source}` placeholder in a command template; if the
/// template never names it, the path is appended as the final argument.
fn substitute_source(template: &[String], source_path: &str) -> Vec<String> {
    let mut argv: Vec<String> = template
        .iter()
        .map(|part| part.replace("{source}", source_path))
        .collect();
    if !template.iter().any(|part| part.contains("{source}")) {
        argv.push(source_path.to_string());
    }
    argv
}

fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_CAPTURED_OUTPUT_BYTES {
        return output.to_string();
    }
    let mut end = MAX_CAPTURED_OUTPUT_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shell profile keeps these tests independent of any interpreter
    /// beyond /bin/sh
    fn sh_runner(timeout_ms: u64) -> ProcessRunner {
        let config = EngineConfig::from_toml(&format!(
            r#"
case_timeout_ms = {}

[languages.sh]
source_suffix = ".sh"
run_command = ["sh", "{{source}}"]
"#,
            timeout_ms
        ))
        .unwrap();
        ProcessRunner::new(config)
    }

    fn case(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.into(),
            expected_output: expected.into(),
        }
    }

    #[tokio::test]
    async fn test_echo_program_passes() {
        let runner = sh_runner(2_000);
        let report = runner
            .run(
                "sh",
                "read line\necho \"$line\"\n",
                &[case("hello\n", "hello"), case("42\n", "42")],
            )
            .await
            .unwrap();
        assert!(report.all_passed);
        assert_eq!(report.cases.len(), 2);
        assert!(report.cases.iter().all(|c| c.error.is_none()));
    }

    #[tokio::test]
    async fn test_wrong_output_fails_without_error() {
        let runner = sh_runner(2_000);
        let report = runner
            .run("sh", "echo nope\n", &[case("", "expected")])
            .await
            .unwrap();
        assert!(!report.all_passed);
        assert!(!report.cases[0].passed);
        assert!(report.cases[0].error.is_none());
        assert_eq!(report.cases[0].actual_output.trim(), "nope");
    }

    #[tokio::test]
    async fn test_infinite_loop_is_contained_by_timeout() {
        let runner = sh_runner(300);
        let started = std::time::Instant::now();
        let report = runner
            .run(
                "sh",
                "while :; do :; done\n",
                &[case("", "never"), case("", "also never")],
            )
            .await
            .unwrap();
        // both cases time out independently; the run itself never fails
        assert!(!report.all_passed);
        for case_report in &report.cases {
            assert!(!case_report.passed);
            assert_eq!(case_report.error.as_deref(), Some(TIMEOUT_ANNOTATION));
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_nonzero_exit_preserves_fault_text() {
        let runner = sh_runner(2_000);
        let report = runner
            .run("sh", "echo boom >&2\nexit 3\n", &[case("", "anything")])
            .await
            .unwrap();
        let case_report = &report.cases[0];
        assert!(!case_report.passed);
        assert!(case_report.error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_stderr_output_fails_even_on_clean_exit() {
        let runner = sh_runner(2_000);
        let report = runner
            .run("sh", "echo ok\necho warning >&2\n", &[case("", "ok")])
            .await
            .unwrap();
        assert!(!report.cases[0].passed);
        assert!(report.cases[0]
            .error
            .as_deref()
            .unwrap()
            .contains("warning"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_case_fault() {
        let config = EngineConfig::from_toml(
            r#"
[languages.ghost]
source_suffix = ".txt"
run_command = ["definitely-not-a-real-interpreter", "{source}"]
"#,
        )
        .unwrap();
        let runner = ProcessRunner::new(config);
        let report = runner.run("ghost", "whatever", &[case("", "x")]).await.unwrap();
        assert!(!report.all_passed);
        assert!(report.cases[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("Execution failed"));
    }

    #[tokio::test]
    async fn test_unknown_language_is_fatal() {
        let runner = sh_runner(2_000);
        let result = runner.run("cobol", "whatever", &[case("", "x")]).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_substitute_source_appends_when_placeholder_missing() {
        let argv = substitute_source(&["sh".into()], "/tmp/x.sh");
        assert_eq!(argv, vec!["sh".to_string(), "/tmp/x.sh".to_string()]);

        let argv = substitute_source(&["sh".into(), "{source}".into()], "/tmp/x.sh");
        assert_eq!(argv, vec!["sh".to_string(), "/tmp/x.sh".to_string()]);
    }
}
