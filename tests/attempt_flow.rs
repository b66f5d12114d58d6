// tests/attempt_flow.rs
//
// Whole-engine flow: a candidate enters a proctored session, answers an
// MCQ and a CODE question, picks up one integrity warning, submits
// manually, and the guard grades and persists exactly one attempt.

use std::sync::Arc;

use chrono::Utc;
use proctor_core::{
    build_review, AttemptError, EngineConfig, Exam, ExamSession, Identity, MemoryStore,
    ProcessRunner, Question, QuestionBody, QuestionReview, SessionDriver, SessionEvent,
    SubmissionGuard, SubmissionStore, SubmitReason, TestCase,
};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

fn exam() -> Exam {
    Exam {
        id: 1,
        title: "Shell basics".into(),
        description: "One choice, one program".into(),
        duration_minutes: 30,
        start_time: None,
        end_time: None,
        total_marks: 3,
        negative_marking: false,
        owner: 7,
    }
}

fn questions() -> Vec<Question> {
    vec![
        Question {
            id: 10,
            exam_id: 1,
            marks: 1,
            body: QuestionBody::Mcq {
                text: "Which command prints its arguments?".into(),
                options: vec!["rm".into(), "echo".into(), "cd".into()],
                correct_option: 1,
            },
        },
        Question {
            id: 11,
            exam_id: 1,
            marks: 2,
            body: QuestionBody::Code {
                prompt: "Read one line and print it back".into(),
                input_format: "one line".into(),
                output_format: "the same line".into(),
                sample_input: "hi".into(),
                sample_output: "hi".into(),
                language: "sh".into(),
                test_cases: vec![
                    TestCase {
                        input: "hello\n".into(),
                        expected_output: "hello".into(),
                    },
                    TestCase {
                        input: "again\n".into(),
                        expected_output: "again".into(),
                    },
                ],
            },
        },
    ]
}

fn sh_runner() -> ProcessRunner {
    let config = EngineConfig::from_toml(
        r#"
case_timeout_ms = 2000

[languages.sh]
source_suffix = ".sh"
run_command = ["sh", "{source}"]
"#,
    )
    .unwrap();
    ProcessRunner::new(config)
}

#[tokio::test]
async fn full_attempt_round_trip() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    store.put_exam(exam(), questions()).await;

    // candidate grants the secure context and the session goes live
    let session = ExamSession::enter(&exam(), questions(), Utc::now()).unwrap();
    let (driver, handle) = SessionDriver::new(session);
    let driver_task = tokio::spawn(driver.run());

    assert!(
        handle
            .send(SessionEvent::SelectOption {
                question: 10,
                option: 1,
            })
            .await
    );
    assert!(
        handle
            .send(SessionEvent::EditCode {
                question: 11,
                source: "read line\necho \"$line\"\n".into(),
            })
            .await
    );

    // a single tab switch: counted, warned, nowhere near escalation
    assert!(handle.send(SessionEvent::FocusLost).await);
    assert!(handle.send(SessionEvent::FocusRestored).await);

    assert!(handle.send(SessionEvent::OpenSubmitConfirm).await);
    assert!(handle.send(SessionEvent::ConfirmSubmit).await);

    let outcome = driver_task
        .await
        .unwrap()
        .expect("manual submit must dispatch");
    assert_eq!(outcome.reason, SubmitReason::Manual);
    assert_eq!(outcome.request.tab_switch_count, 1);

    // the guard grades the payload and persists the one allowed attempt
    let guard = SubmissionGuard::new(store.clone(), store.clone(), store.clone());
    let runner = sh_runner();
    let identity = Some(Identity::candidate(42));

    let receipt = guard
        .evaluate_and_submit(identity, outcome.request.clone(), &runner)
        .await
        .unwrap();
    assert_eq!(receipt.score, 3);
    assert_eq!(receipt.total_score, 3);
    assert_eq!(receipt.percentage, 100.00);

    // a second attempt with the same identity is rejected
    let err = guard
        .evaluate_and_submit(identity, outcome.request, &runner)
        .await
        .unwrap_err();
    assert!(matches!(err, AttemptError::DuplicateAttempt));
    assert_eq!(store.submission_count().await, 1);

    // review reconstructs the attempt from persisted data alone
    let submission = store.find(1, 42).await.unwrap().unwrap();
    let review = build_review(&questions(), &submission);
    match &review[0] {
        QuestionReview::Mcq {
            selected_option,
            is_correct,
            ..
        } => {
            assert_eq!(*selected_option, Some(1));
            assert!(is_correct);
        }
        _ => panic!("expected MCQ review"),
    }
    match &review[1] {
        QuestionReview::Code { submitted_code, .. } => {
            assert!(submitted_code.as_deref().unwrap().contains("echo"));
        }
        _ => panic!("expected CODE review"),
    }
}

#[tokio::test]
async fn failing_program_earns_only_mcq_marks() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    store.put_exam(exam(), questions()).await;

    let session = ExamSession::enter(&exam(), questions(), Utc::now()).unwrap();
    let (driver, handle) = SessionDriver::new(session);
    let driver_task = tokio::spawn(driver.run());

    assert!(
        handle
            .send(SessionEvent::SelectOption {
                question: 10,
                option: 1,
            })
            .await
    );
    // echoes a constant, so the second test case fails: no partial credit
    assert!(
        handle
            .send(SessionEvent::EditCode {
                question: 11,
                source: "echo hello\n".into(),
            })
            .await
    );
    assert!(handle.send(SessionEvent::OpenSubmitConfirm).await);
    assert!(handle.send(SessionEvent::ConfirmSubmit).await);

    let outcome = driver_task.await.unwrap().unwrap();
    let guard = SubmissionGuard::new(store.clone(), store.clone(), store.clone());

    let receipt = guard
        .evaluate_and_submit(Some(Identity::candidate(43)), outcome.request, &sh_runner())
        .await
        .unwrap();
    assert_eq!(receipt.score, 1);
    assert_eq!(receipt.total_score, 3);
}
