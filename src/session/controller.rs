use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::core::config::ProctoringSettings;
use crate::core::time::{format_clock, format_offset};
use crate::schemas::submission::{
    AnswerValue, AnsweredQuestion, IntegrityCounters, LearnerIdentity, ProctoringGrant,
    SubmissionRecord, SubmitTrigger, WatcherClass,
};
use crate::schemas::test::TestDefinition;
use crate::services::environment::Environment;
use crate::services::gateway::{GatewayError, SubmissionGateway, TestSource};
use crate::session::answers::AnswerStore;
use crate::session::integrity::{
    CameraEvent, EscalationPolicy, IntegrityMonitor, KeyGesture, KeyDisposition, KeyGuard,
    LossReason,
};
use crate::session::scoring;
use crate::session::timer::{self, Countdown, TimerSignal};

const AUTO_SUBMIT_FAILED: &str = "Auto-submit failed. Please contact support.";
const SUBMIT_FAILED: &str = "Failed to submit test. Please contact support.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalState {
    Submitted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    AwaitingConsent,
    Preparing,
    InProgress,
    Submitting,
    Terminal(TerminalState),
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingConsent => "awaiting_consent",
            Self::Preparing => "preparing",
            Self::InProgress => "in_progress",
            Self::Submitting => "submitting",
            Self::Terminal(TerminalState::Submitted) => "submitted",
            Self::Terminal(TerminalState::Failed) => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionStatus {
    NotSubmitted,
    Submitted,
    Failed,
}

/// Inputs the host forwards to a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Consent(LearnerIdentity),
    Answer { index: usize, value: AnswerValue },
    Submit,
    FullscreenChanged { active: bool },
    KeySuppressed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CameraStatus {
    Disconnected { reason: LossReason },
    Reconnected { device_id: Option<String> },
    Restored,
}

/// Messages for the learner-facing UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "camelCase")]
pub enum Notice {
    ValidationFailed { message: String },
    ProctoringDegraded { grant: ProctoringGrant },
    /// Blocking warning. `remaining` is `None` for advisory classes.
    IntegrityWarning { class: WatcherClass, count: u32, remaining: Option<u32> },
    CameraStatus(CameraStatus),
    Clock { remaining_seconds: u32, display: String },
    Submitted { score: u32, total: u32, trigger: SubmitTrigger },
    SubmissionFailed { message: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsentError {
    #[error("{0}")]
    Invalid(String),
    #[error("batch '{0}' is not eligible for this test")]
    IneligibleBatch(String),
    #[error("the test has already started")]
    AlreadyStarted,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{operation} is not allowed while the session is {phase}")]
    WrongPhase { operation: &'static str, phase: Phase },
    #[error("question {index} does not exist; the test has {count} questions")]
    UnknownQuestion { index: usize, count: usize },
    #[error("test '{0}' was not found")]
    TestNotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Submitted(SubmissionRecord),
    Failed { record: SubmissionRecord, error: GatewayError },
    /// Every handle was dropped before any trigger fired.
    Abandoned,
}

impl Outcome {
    pub fn record(&self) -> Option<&SubmissionRecord> {
        match self {
            Self::Submitted(record) | Self::Failed { record, .. } => Some(record),
            Self::Abandoned => None,
        }
    }
}

/// Proof that this session won the single transition out of `InProgress`.
///
/// Only the latch mints tickets and sealing consumes one, so a session can build at most
/// one submission record.
#[must_use = "a claimed submission is only written once the ticket is finalized"]
#[derive(Debug)]
pub struct SubmissionTicket {
    trigger: SubmitTrigger,
}

impl SubmissionTicket {
    pub fn trigger(&self) -> SubmitTrigger {
        self.trigger
    }
}

#[derive(Debug, Default)]
struct SubmissionLatch {
    claimed: Option<SubmitTrigger>,
}

impl SubmissionLatch {
    fn claim(&mut self, trigger: SubmitTrigger) -> Option<SubmissionTicket> {
        if let Some(winner) = self.claimed {
            tracing::debug!(
                trigger = trigger.label(),
                winner = winner.label(),
                "Submission already requested"
            );
            return None;
        }
        self.claimed = Some(trigger);
        Some(SubmissionTicket { trigger })
    }
}

/// Cloneable sender side of a session, handed to the UI. Dropping every handle while the
/// test is still open abandons the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    events: UnboundedSender<SessionEvent>,
    keys: KeyGuard,
}

impl SessionHandle {
    /// Returns `false` once the session loop has stopped.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn consent(&self, identity: LearnerIdentity) -> bool {
        self.send(SessionEvent::Consent(identity))
    }

    pub fn set_answer(&self, index: usize, value: impl Into<AnswerValue>) -> bool {
        self.send(SessionEvent::Answer { index, value: value.into() })
    }

    pub fn submit(&self) -> bool {
        self.send(SessionEvent::Submit)
    }

    pub fn fullscreen_changed(&self, active: bool) -> bool {
        self.send(SessionEvent::FullscreenChanged { active })
    }

    pub fn intercept_key(&self, gesture: KeyGesture) -> KeyDisposition {
        self.keys.intercept(gesture)
    }

    pub fn key_guard(&self) -> KeyGuard {
        self.keys.clone()
    }
}

enum Wake {
    Tick,
    Camera,
    Event(Option<SessionEvent>),
}

/// One learner's attempt at one test, from consent to the stored record.
///
/// The controller is the only writer of session state. Watchers, the countdown and the
/// UI feed it events; every trigger that can end the test goes through the latch.
pub struct SessionController {
    session_id: Uuid,
    test_id: String,
    definition: TestDefinition,
    policy: EscalationPolicy,
    camera_poll: std::time::Duration,
    phase: Phase,
    identity: Option<LearnerIdentity>,
    answers: AnswerStore,
    counters: IntegrityCounters,
    camera_healthy: bool,
    proctoring: ProctoringGrant,
    countdown: Option<Countdown>,
    latch: SubmissionLatch,
    monitor: IntegrityMonitor,
    gateway: Arc<dyn SubmissionGateway>,
    inbox: UnboundedReceiver<SessionEvent>,
    notices: UnboundedSender<Notice>,
    settled: Option<Outcome>,
}

impl SessionController {
    pub fn new(
        test_id: impl Into<String>,
        definition: TestDefinition,
        env: Arc<dyn Environment>,
        gateway: Arc<dyn SubmissionGateway>,
        settings: &ProctoringSettings,
    ) -> (Self, SessionHandle, UnboundedReceiver<Notice>) {
        let (events, inbox) = mpsc::unbounded_channel();
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let armed = Arc::new(AtomicBool::new(false));

        let handle = SessionHandle {
            events: events.clone(),
            keys: KeyGuard::new(Arc::clone(&armed), events),
        };
        let controller = Self {
            session_id: Uuid::new_v4(),
            test_id: test_id.into(),
            answers: AnswerStore::for_questions(&definition.questions),
            definition,
            policy: EscalationPolicy::from_settings(settings),
            camera_poll: settings.camera_poll_interval(),
            phase: Phase::AwaitingConsent,
            identity: None,
            counters: IntegrityCounters::default(),
            camera_healthy: false,
            proctoring: ProctoringGrant::default(),
            countdown: None,
            latch: SubmissionLatch::default(),
            monitor: IntegrityMonitor::new(env, settings, armed),
            gateway,
            inbox,
            notices,
            settled: None,
        };

        (controller, handle, notice_rx)
    }

    /// Fetches the test by identifier and builds a session for it.
    pub async fn open(
        test_id: &str,
        source: &dyn TestSource,
        env: Arc<dyn Environment>,
        gateway: Arc<dyn SubmissionGateway>,
        settings: &ProctoringSettings,
    ) -> Result<(Self, SessionHandle, UnboundedReceiver<Notice>), SessionError> {
        let definition = source
            .fetch_test(test_id)
            .await?
            .ok_or_else(|| SessionError::TestNotFound(test_id.to_string()))?;

        Ok(Self::new(test_id, definition, env, gateway, settings))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn identity(&self) -> Option<&LearnerIdentity> {
        self.identity.as_ref()
    }

    pub fn answers(&self) -> &AnswerStore {
        &self.answers
    }

    pub fn counters(&self) -> IntegrityCounters {
        self.counters
    }

    pub fn camera_healthy(&self) -> bool {
        self.camera_healthy
    }

    pub fn proctoring(&self) -> ProctoringGrant {
        self.proctoring
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.countdown
            .as_ref()
            .map_or(self.definition.duration_seconds(), Countdown::remaining)
    }

    pub fn submission_status(&self) -> SubmissionStatus {
        match self.phase {
            Phase::Terminal(TerminalState::Submitted) => SubmissionStatus::Submitted,
            Phase::Terminal(TerminalState::Failed) => SubmissionStatus::Failed,
            _ => SubmissionStatus::NotSubmitted,
        }
    }

    /// Validates the learner's details. On failure the session stays where it is and the
    /// first problem is posted as a notice.
    pub fn consent(&mut self, identity: LearnerIdentity) -> Result<(), ConsentError> {
        if self.phase != Phase::AwaitingConsent {
            return Err(ConsentError::AlreadyStarted);
        }

        let identity = identity.trimmed();
        let checked = identity.check().map_err(ConsentError::Invalid).and_then(|()| {
            if self.definition.accepts_batch(&identity.batch) {
                Ok(())
            } else {
                Err(ConsentError::IneligibleBatch(identity.batch.clone()))
            }
        });
        if let Err(err) = checked {
            let message = match &err {
                ConsentError::Invalid(message) => message.clone(),
                _ => "Please select a valid batch".to_string(),
            };
            tracing::info!(session_id = %self.session_id, reason = %err, "Consent rejected");
            self.notify(Notice::ValidationFailed { message });
            return Err(err);
        }

        tracing::info!(
            session_id = %self.session_id,
            test_id = %self.test_id,
            batch = %identity.batch,
            "Learner consented"
        );
        self.identity = Some(identity);
        self.phase = Phase::Preparing;
        Ok(())
    }

    /// Acquires proctoring capabilities and starts the test, degraded if the host refuses
    /// any of them.
    pub async fn prepare(&mut self) -> Result<ProctoringGrant, SessionError> {
        if self.phase != Phase::Preparing {
            return Err(SessionError::WrongPhase { operation: "prepare", phase: self.phase });
        }

        let grant = self.monitor.engage().await;
        self.proctoring = grant;
        self.camera_healthy = grant.camera;
        if !grant.is_complete() {
            tracing::warn!(
                session_id = %self.session_id,
                camera = grant.camera,
                microphone = grant.microphone,
                fullscreen = grant.fullscreen,
                "Proctoring degraded"
            );
            self.notify(Notice::ProctoringDegraded { grant });
        }

        let countdown = Countdown::start(self.definition.duration_seconds());
        self.notify(Notice::Clock {
            remaining_seconds: countdown.remaining(),
            display: format_clock(countdown.remaining()),
        });
        self.countdown = Some(countdown);
        self.phase = Phase::InProgress;

        tracing::info!(
            session_id = %self.session_id,
            test_id = %self.test_id,
            duration_seconds = self.definition.duration_seconds(),
            "Test started"
        );
        Ok(grant)
    }

    /// Stores `value` for the question at `index`; the latest write wins.
    pub fn set_answer(&mut self, index: usize, value: AnswerValue) -> Result<(), SessionError> {
        if self.phase != Phase::InProgress {
            return Err(SessionError::WrongPhase { operation: "set_answer", phase: self.phase });
        }

        let count = self.answers.len();
        self.answers.set(index, value).ok_or(SessionError::UnknownQuestion { index, count })
    }

    /// Learner-initiated submit. Any answer state is accepted, including none at all.
    #[must_use = "a claimed submission is only written once the ticket is finalized"]
    pub fn request_submit(&mut self) -> Option<SubmissionTicket> {
        self.claim_submission(SubmitTrigger::Manual)
    }

    /// Advances the countdown by one second.
    #[must_use = "a claimed submission is only written once the ticket is finalized"]
    pub fn tick(&mut self) -> Option<SubmissionTicket> {
        if self.phase != Phase::InProgress {
            return None;
        }

        let signal = self.countdown.as_mut()?.tick()?;
        let remaining = match signal {
            TimerSignal::Tick { remaining } => remaining,
            TimerSignal::Expired => 0,
        };
        self.notify(Notice::Clock { remaining_seconds: remaining, display: format_clock(remaining) });

        if signal != TimerSignal::Expired {
            return None;
        }
        tracing::info!(session_id = %self.session_id, "Time is up");
        self.claim_submission(SubmitTrigger::TimerExpired)
    }

    #[must_use = "a claimed submission is only written once the ticket is finalized"]
    pub fn fullscreen_changed(&mut self, active: bool) -> Option<SubmissionTicket> {
        if self.phase != Phase::InProgress || !self.monitor.fullscreen_changed(active) {
            return None;
        }

        let ticket = self.record_violation(WatcherClass::Fullscreen);
        if ticket.is_none() {
            self.monitor.restore_fullscreen();
        }
        ticket
    }

    #[must_use = "a claimed submission is only written once the ticket is finalized"]
    pub fn key_suppressed(&mut self) -> Option<SubmissionTicket> {
        if self.phase != Phase::InProgress {
            return None;
        }
        self.record_violation(WatcherClass::KeySuppression)
    }

    /// Runs one camera liveness check.
    #[must_use = "a claimed submission is only written once the ticket is finalized"]
    pub async fn poll_camera(&mut self) -> Option<SubmissionTicket> {
        if self.phase != Phase::InProgress {
            return None;
        }

        match self.monitor.probe_camera().await? {
            CameraEvent::Reacquired { device_id } => {
                self.camera_healthy = true;
                self.notify(Notice::CameraStatus(CameraStatus::Reconnected { device_id }));
                None
            }
            CameraEvent::Restored => {
                self.camera_healthy = true;
                tracing::info!(session_id = %self.session_id, "Camera restored");
                self.notify(Notice::CameraStatus(CameraStatus::Restored));
                None
            }
            CameraEvent::Lost { reason } => {
                self.camera_healthy = false;
                self.notify(Notice::CameraStatus(CameraStatus::Disconnected { reason }));
                self.record_violation(WatcherClass::Camera)
            }
        }
    }

    /// Applies one host event. Events that arrive after the test left `InProgress` are
    /// ignored.
    #[must_use = "a claimed submission is only written once the ticket is finalized"]
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<SubmissionTicket> {
        match event {
            SessionEvent::Consent(identity) => {
                if let Err(err) = self.consent(identity) {
                    tracing::debug!(session_id = %self.session_id, error = %err, "Consent ignored");
                }
                None
            }
            SessionEvent::Answer { index, value } => {
                if let Err(err) = self.set_answer(index, value) {
                    tracing::warn!(session_id = %self.session_id, error = %err, "Answer ignored");
                }
                None
            }
            SessionEvent::Submit => self.request_submit(),
            SessionEvent::FullscreenChanged { active } => self.fullscreen_changed(active),
            SessionEvent::KeySuppressed => self.key_suppressed(),
        }
    }

    /// Applies events already queued by handles without waiting for more.
    #[must_use = "a claimed submission is only written once the ticket is finalized"]
    pub fn drain_pending(&mut self) -> Option<SubmissionTicket> {
        while let Ok(event) = self.inbox.try_recv() {
            if let Some(ticket) = self.handle_event(event) {
                return Some(ticket);
            }
        }
        None
    }

    /// Scores the frozen answers and builds the one record this session will produce.
    pub fn seal(&mut self, ticket: SubmissionTicket) -> SubmissionRecord {
        let questions = &self.definition.questions;
        let answers = self.answers.as_slice();
        let score = scoring::score(questions, answers);
        let total_questions = u32::try_from(questions.len()).unwrap_or(u32::MAX);

        let answered = questions
            .iter()
            .zip(answers)
            .enumerate()
            .map(|(index, (question, response))| AnsweredQuestion {
                question_id: index,
                question_text: question.prompt().to_string(),
                question_type: question.kind(),
                response: response.clone(),
                correct_answer: question.correct_answer(),
            })
            .collect();

        SubmissionRecord {
            session_id: self.session_id,
            test_id: self.test_id.clone(),
            test_title: self.definition.title.clone(),
            user_details: self.identity.clone().unwrap_or_default(),
            answers: answered,
            submitted_at: format_offset(OffsetDateTime::now_utc()),
            score,
            total_questions,
            percentage: scoring::percentage(score, total_questions),
            time_taken: self.countdown.as_ref().map_or(0, Countdown::elapsed),
            integrity: self.counters,
            camera_healthy: self.camera_healthy,
            proctoring: self.proctoring,
            trigger: ticket.trigger,
        }
    }

    /// Seals the record and makes the single gateway write. Events arriving while the
    /// write is in flight are drained and ignored.
    pub async fn finalize(&mut self, ticket: SubmissionTicket) -> Outcome {
        let record = self.seal(ticket);
        let gateway = Arc::clone(&self.gateway);

        let result = {
            let mut write = gateway.append(&record);
            let mut inbox_open = true;

            loop {
                let event = tokio::select! {
                    result = &mut write => break result,
                    event = self.inbox.recv(), if inbox_open => event,
                };
                match event {
                    Some(event) => {
                        // The latch is already claimed, so late triggers yield nothing.
                        let _ = self.handle_event(event);
                    }
                    None => inbox_open = false,
                }
            }
        };

        self.settle(record, result)
    }

    /// Drives the session until it ends: consent, preparation, the live test and the
    /// final write. A session already finalized by hand returns its settled outcome.
    pub async fn run(mut self) -> Outcome {
        if let Some(outcome) = self.settled.take() {
            return outcome;
        }

        while self.phase == Phase::AwaitingConsent {
            let Some(event) = self.inbox.recv().await else {
                return self.abandon();
            };
            let _ = self.handle_event(event);
        }

        if let Err(err) = self.prepare().await {
            tracing::debug!(session_id = %self.session_id, error = %err, "Session already prepared");
        }

        let mut clock = timer::ticker();
        let mut camera_poll = interval_at(Instant::now() + self.camera_poll, self.camera_poll);
        camera_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let camera_on = self.monitor.camera_attached();
            let wake = tokio::select! {
                _ = clock.tick() => Wake::Tick,
                _ = camera_poll.tick(), if camera_on => Wake::Camera,
                event = self.inbox.recv() => Wake::Event(event),
            };

            let ticket = match wake {
                Wake::Tick => self.tick(),
                Wake::Camera => self.poll_camera().await,
                Wake::Event(Some(event)) => self.handle_event(event),
                Wake::Event(None) => return self.abandon(),
            };

            if let Some(ticket) = ticket {
                return self.finalize(ticket).await;
            }
        }
    }

    fn record_violation(&mut self, class: WatcherClass) -> Option<SubmissionTicket> {
        let count = self.counters.record(class);
        crate::core::metrics::record_violation(class);
        tracing::warn!(
            session_id = %self.session_id,
            class = class.as_str(),
            count,
            "Integrity violation"
        );

        if self.policy.breached(class, count) {
            return self.claim_submission(SubmitTrigger::IntegrityBreach { class });
        }
        if self.policy.counts(class) {
            let remaining = self.policy.remaining(class, count);
            self.notify(Notice::IntegrityWarning { class, count, remaining });
        }
        None
    }

    /// The critical section. Checks and sets the latch in one synchronous step, then stops
    /// the countdown and lets go of every watcher before any await can happen.
    fn claim_submission(&mut self, trigger: SubmitTrigger) -> Option<SubmissionTicket> {
        if self.phase != Phase::InProgress {
            tracing::debug!(
                session_id = %self.session_id,
                trigger = trigger.label(),
                phase = %self.phase,
                "Submission trigger ignored"
            );
            return None;
        }

        let ticket = self.latch.claim(trigger)?;
        self.phase = Phase::Submitting;
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.stop();
        }
        self.monitor.release();

        tracing::info!(
            session_id = %self.session_id,
            test_id = %self.test_id,
            trigger = trigger.label(),
            "Submitting test"
        );
        Some(ticket)
    }

    fn settle(&mut self, record: SubmissionRecord, result: Result<(), GatewayError>) -> Outcome {
        self.monitor.release();

        let outcome = match result {
            Ok(()) => {
                self.phase = Phase::Terminal(TerminalState::Submitted);
                crate::core::metrics::record_submission(&record.trigger, "submitted");
                tracing::info!(
                    session_id = %self.session_id,
                    test_id = %self.test_id,
                    score = record.score,
                    total = record.total_questions,
                    trigger = record.trigger.label(),
                    "Test submitted"
                );
                self.notify(Notice::Submitted {
                    score: record.score,
                    total: record.total_questions,
                    trigger: record.trigger,
                });
                Outcome::Submitted(record)
            }
            Err(error) => {
                self.phase = Phase::Terminal(TerminalState::Failed);
                crate::core::metrics::record_submission(&record.trigger, "failed");
                tracing::error!(
                    session_id = %self.session_id,
                    test_id = %self.test_id,
                    trigger = record.trigger.label(),
                    error = %error,
                    "Submission write failed"
                );
                let message =
                    if record.trigger.is_automatic() { AUTO_SUBMIT_FAILED } else { SUBMIT_FAILED };
                self.notify(Notice::SubmissionFailed { message: message.to_string() });
                Outcome::Failed { record, error }
            }
        };
        self.settled = Some(outcome.clone());
        outcome
    }

    fn abandon(mut self) -> Outcome {
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.stop();
        }
        self.monitor.release();
        tracing::warn!(
            session_id = %self.session_id,
            test_id = %self.test_id,
            phase = %self.phase,
            "Session abandoned"
        );
        Outcome::Abandoned
    }

    fn notify(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            tracing::trace!(session_id = %self.session_id, "No listener for session notices");
        }
    }
}
