use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::schemas::test::QuestionKind;

/// Details a learner enters on the consent form before the test starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct LearnerIdentity {
    #[validate(length(min = 1, message = "Please fill all required fields"))]
    pub name: String,
    #[validate(
        length(min = 1, message = "Please fill all required fields"),
        email(message = "Please enter a valid email address")
    )]
    pub email: String,
    #[validate(length(min = 1, message = "Please select a batch"))]
    pub batch: String,
}

impl LearnerIdentity {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        batch: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), email: email.into(), batch: batch.into() }
    }

    pub(crate) fn trimmed(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            batch: self.batch.trim().to_string(),
        }
    }

    /// Returns the first message to show on the form, in field order.
    pub(crate) fn check(&self) -> Result<(), String> {
        let Err(errors) = self.validate() else {
            return Ok(());
        };

        let fields = errors.field_errors();
        let message = ["name", "email", "batch"]
            .iter()
            .filter_map(|field| fields.get(*field))
            .flat_map(|errors| errors.iter())
            .find_map(|error| error.message.as_ref().map(|message| message.to_string()))
            .unwrap_or_else(|| errors.to_string());
        Err(message)
    }
}

/// Content of one answer slot. Empty text or an empty set means unanswered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Choices(BTreeSet<String>),
}

impl AnswerValue {
    pub fn empty_for(kind: QuestionKind) -> Self {
        match kind {
            QuestionKind::MultipleChoice => Self::Choices(BTreeSet::new()),
            _ => Self::Text(String::new()),
        }
    }

    pub fn choices<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Choices(items.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Choices(choices) => choices.is_empty(),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatcherClass {
    Fullscreen,
    Camera,
    KeySuppression,
}

impl WatcherClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fullscreen => "fullscreen",
            Self::Camera => "camera",
            Self::KeySuppression => "key_suppression",
        }
    }
}

/// Violation tallies, one per watcher class. Never decremented within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityCounters {
    pub fullscreen_exits: u32,
    pub camera_losses: u32,
    pub suppressed_keys: u32,
}

impl IntegrityCounters {
    pub fn get(&self, class: WatcherClass) -> u32 {
        match class {
            WatcherClass::Fullscreen => self.fullscreen_exits,
            WatcherClass::Camera => self.camera_losses,
            WatcherClass::KeySuppression => self.suppressed_keys,
        }
    }

    pub(crate) fn record(&mut self, class: WatcherClass) -> u32 {
        let slot = match class {
            WatcherClass::Fullscreen => &mut self.fullscreen_exits,
            WatcherClass::Camera => &mut self.camera_losses,
            WatcherClass::KeySuppression => &mut self.suppressed_keys,
        };
        *slot = slot.saturating_add(1);
        *slot
    }
}

/// Which proctoring capabilities the environment granted when the test started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctoringGrant {
    pub camera: bool,
    pub microphone: bool,
    pub fullscreen: bool,
}

impl ProctoringGrant {
    pub fn is_complete(&self) -> bool {
        self.camera && self.fullscreen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubmitTrigger {
    Manual,
    TimerExpired,
    IntegrityBreach { class: WatcherClass },
}

impl SubmitTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::TimerExpired => "timer_expired",
            Self::IntegrityBreach { .. } => "integrity_breach",
        }
    }

    pub fn is_automatic(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsweredQuestion {
    pub question_id: usize,
    pub question_text: String,
    pub question_type: QuestionKind,
    pub response: AnswerValue,
    pub correct_answer: Option<AnswerValue>,
}

/// Snapshot written once to the submission gateway when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub session_id: Uuid,
    pub test_id: String,
    pub test_title: String,
    pub user_details: LearnerIdentity,
    pub answers: Vec<AnsweredQuestion>,
    pub submitted_at: String,
    pub score: u32,
    pub total_questions: u32,
    pub percentage: f64,
    /// Seconds spent between the start of the countdown and submission.
    pub time_taken: u32,
    pub integrity: IntegrityCounters,
    pub camera_healthy: bool,
    pub proctoring: ProctoringGrant,
    pub trigger: SubmitTrigger,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn identity_check_reports_first_failing_field() {
        let missing_name = LearnerIdentity::new("", "asha@college.edu", "A1");
        assert_eq!(missing_name.check().unwrap_err(), "Please fill all required fields");

        let bad_email = LearnerIdentity::new("Asha", "asha@", "A1");
        assert_eq!(bad_email.check().unwrap_err(), "Please enter a valid email address");

        let no_batch = LearnerIdentity::new("Asha", "asha@college.edu", "");
        assert_eq!(no_batch.check().unwrap_err(), "Please select a batch");

        assert!(LearnerIdentity::new("Asha", "asha@college.edu", "A1").check().is_ok());
    }

    #[test]
    fn answer_values_use_plain_json_shapes() {
        assert_eq!(serde_json::to_value(AnswerValue::from("Paris")).unwrap(), json!("Paris"));
        assert_eq!(
            serde_json::to_value(AnswerValue::choices(["4", "2"])).unwrap(),
            json!(["2", "4"])
        );
        let parsed: AnswerValue = serde_json::from_value(json!(["1", "3"])).unwrap();
        assert_eq!(parsed, AnswerValue::choices(["3", "1"]));
        assert!(AnswerValue::empty_for(QuestionKind::MultipleChoice).is_empty());
        assert!(AnswerValue::empty_for(QuestionKind::Numeric).is_empty());
    }

    #[test]
    fn counters_are_independent_per_class() {
        let mut counters = IntegrityCounters::default();
        assert_eq!(counters.record(WatcherClass::Fullscreen), 1);
        assert_eq!(counters.record(WatcherClass::Fullscreen), 2);
        assert_eq!(counters.record(WatcherClass::KeySuppression), 1);
        assert_eq!(counters.get(WatcherClass::Camera), 0);
        assert_eq!(counters.get(WatcherClass::Fullscreen), 2);
    }

    #[test]
    fn trigger_serializes_with_kind_tag() {
        let trigger = SubmitTrigger::IntegrityBreach { class: WatcherClass::KeySuppression };
        assert_eq!(
            serde_json::to_value(trigger).unwrap(),
            json!({"kind": "integrityBreach", "class": "keySuppression"})
        );
        assert!(trigger.is_automatic());
        assert!(!SubmitTrigger::Manual.is_automatic());
    }
}
