use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::schemas::submission::{AnswerValue, LearnerIdentity, SubmissionRecord};
use crate::schemas::test::{Question, TestDefinition};
use crate::services::gateway::{GatewayError, SubmissionGateway};

pub(crate) use crate::session::replay::ScriptedEnvironment as FakeEnvironment;

const OVERRIDDEN_VARS: &[&str] = &[
    "ENVIRONMENT",
    "PROCTOR_VIOLATION_THRESHOLD",
    "PROCTOR_CAMERA_POLL_MS",
    "PROCTOR_DARK_FRAME_LUMA",
    "PROCTOR_DARK_FRAME_STREAK",
    "PROCTOR_CAMERA_REACQUIRE_ATTEMPTS",
    "PROCTOR_CAMERA_STRIKES",
    "PROCTOR_STORE_URL",
    "PROCTOR_STORE_API_KEY",
    "PROCTOR_STORE_TIMEOUT_SECONDS",
    "PROCTOR_TESTS_COLLECTION",
    "PROCTOR_RESPONSES_COLLECTION",
    "PROCTOR_LOG_LEVEL",
    "PROCTOR_LOG_JSON",
];

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("PROCTOR_ENV", "test");
    std::env::set_var("PROCTOR_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for name in OVERRIDDEN_VARS {
        std::env::remove_var(name);
    }
}

/// Gateway double that keeps every record it is handed.
#[derive(Debug, Default)]
pub(crate) struct RecordingGateway {
    records: StdMutex<Vec<SubmissionRecord>>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl RecordingGateway {
    pub(crate) fn failing(message: &str) -> Self {
        Self { failure: Some(message.to_string()), ..Self::default() }
    }

    /// Holds each write open for `delay` before acknowledging it.
    pub(crate) fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub(crate) fn records(&self) -> Vec<SubmissionRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl SubmissionGateway for RecordingGateway {
    async fn append(&self, record: &SubmissionRecord) -> Result<(), GatewayError> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(GatewayError::Transport(message.clone())),
            None => Ok(()),
        }
    }
}

pub(crate) fn learner() -> LearnerIdentity {
    LearnerIdentity::new("Asha Rao", "asha@college.edu", "A1")
}

/// One-minute test: a single-choice and a multiple-choice question.
pub(crate) fn capitals_definition() -> TestDefinition {
    TestDefinition {
        title: "Capitals and numbers".to_string(),
        duration: 1,
        questions: vec![
            Question::SingleChoice {
                text: "Capital of France?".to_string(),
                options: ["Paris", "Lyon", "Nice", "Marseille"].map(String::from).to_vec(),
                correct_answer: "Paris".to_string(),
            },
            Question::MultipleChoice {
                text: "Pick the even numbers".to_string(),
                options: ["1", "2", "3", "4"].map(String::from).to_vec(),
                correct_answer: BTreeSet::from(["2".to_string(), "4".to_string()]),
            },
        ],
        batches: vec!["A1".to_string(), "B2".to_string()],
    }
}

/// The capitals test plus one question of every hand-graded kind.
pub(crate) fn mixed_definition() -> TestDefinition {
    let mut definition = capitals_definition();
    definition.duration = 20;
    definition.questions.extend([
        Question::ShortText { text: "Name the river through Paris".to_string() },
        Question::Numeric { text: "How many arrondissements does Paris have?".to_string() },
        Question::Essay { text: "Describe the Loire valley".to_string() },
    ]);
    definition
}

pub(crate) fn correct_answers(definition: &TestDefinition) -> Vec<AnswerValue> {
    definition
        .questions
        .iter()
        .map(|question| {
            question.correct_answer().unwrap_or_else(|| AnswerValue::empty_for(question.kind()))
        })
        .collect()
}
