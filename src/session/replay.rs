use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::schemas::submission::{AnswerValue, LearnerIdentity, SubmissionRecord};
use crate::services::environment::{
    CameraDevice, CapabilityError, Environment, MediaGrant, TrackState,
};
use crate::services::gateway::{GatewayError, SubmissionGateway};
use crate::session::controller::{Outcome, SessionController, SessionHandle, SubmissionTicket};
use crate::session::integrity::KeyGesture;

const BRIGHT_FRAME: f32 = 128.0;

fn granted() -> bool {
    true
}

/// Capabilities the simulated host grants when the test starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostProfile {
    #[serde(default = "granted")]
    pub camera: bool,
    #[serde(default = "granted")]
    pub microphone: bool,
    #[serde(default = "granted")]
    pub fullscreen: bool,
    #[serde(default)]
    pub cameras: Vec<String>,
}

impl Default for HostProfile {
    fn default() -> Self {
        Self { camera: true, microphone: true, fullscreen: true, cameras: Vec::new() }
    }
}

#[derive(Debug)]
struct HostState {
    camera: bool,
    microphone: bool,
    media_error: Option<CapabilityError>,
    fullscreen_error: Option<CapabilityError>,
    refused_devices: HashSet<String>,
    cameras: Vec<CameraDevice>,
    track: TrackState,
    luminance: Option<f32>,
    fullscreen: bool,
    media_requests: Vec<Option<String>>,
    fullscreen_requests: usize,
    media_releases: usize,
    fullscreen_exits: usize,
}

/// In-memory host whose devices are driven by a script instead of hardware.
#[derive(Debug)]
pub struct ScriptedEnvironment {
    state: Mutex<HostState>,
}

impl ScriptedEnvironment {
    pub fn from_profile(profile: &HostProfile) -> Self {
        let cameras = profile
            .cameras
            .iter()
            .map(|id| CameraDevice { device_id: id.clone(), label: format!("Camera {id}") })
            .collect();
        let fullscreen_error = (!profile.fullscreen).then_some(CapabilityError::Unsupported);

        Self {
            state: Mutex::new(HostState {
                camera: profile.camera,
                microphone: profile.microphone,
                media_error: None,
                fullscreen_error,
                refused_devices: HashSet::new(),
                cameras,
                track: if profile.camera { TrackState::Live } else { TrackState::Missing },
                luminance: Some(BRIGHT_FRAME),
                fullscreen: false,
                media_requests: Vec::new(),
                fullscreen_requests: 0,
                media_releases: 0,
                fullscreen_exits: 0,
            }),
        }
    }

    pub fn granting_all() -> Self {
        Self::from_profile(&HostProfile::default())
    }

    pub fn with_cameras(self, ids: &[&str]) -> Self {
        self.lock().cameras = ids
            .iter()
            .map(|id| CameraDevice { device_id: id.to_string(), label: format!("Camera {id}") })
            .collect();
        self
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fullscreen(&self, active: bool) {
        self.lock().fullscreen = active;
    }

    pub fn set_track_state(&self, track: TrackState) {
        self.lock().track = track;
    }

    pub fn set_luminance(&self, luminance: Option<f32>) {
        self.lock().luminance = luminance;
    }

    /// Every media request fails with `error` until `restore_media`.
    pub fn fail_media(&self, error: CapabilityError) {
        self.lock().media_error = Some(error);
    }

    pub fn restore_media(&self) {
        self.lock().media_error = None;
    }

    pub fn refuse_fullscreen(&self, error: CapabilityError) {
        self.lock().fullscreen_error = Some(error);
    }

    pub fn refuse_device(&self, device_id: &str) {
        self.lock().refused_devices.insert(device_id.to_string());
    }

    pub fn media_requests(&self) -> Vec<Option<String>> {
        self.lock().media_requests.clone()
    }

    pub fn fullscreen_requests(&self) -> usize {
        self.lock().fullscreen_requests
    }

    pub fn media_releases(&self) -> usize {
        self.lock().media_releases
    }

    pub fn fullscreen_exits(&self) -> usize {
        self.lock().fullscreen_exits
    }
}

#[async_trait]
impl Environment for ScriptedEnvironment {
    async fn acquire_media(&self, device_id: Option<&str>) -> Result<MediaGrant, CapabilityError> {
        let mut state = self.lock();
        state.media_requests.push(device_id.map(str::to_string));

        if let Some(error) = state.media_error.clone() {
            return Err(error);
        }
        if let Some(device) = device_id.filter(|id| state.refused_devices.contains(*id)) {
            return Err(CapabilityError::DeviceLost(device.to_string()));
        }
        if !state.camera && !state.microphone {
            return Err(CapabilityError::Denied("camera and microphone blocked".to_string()));
        }

        let device_id = device_id
            .map(str::to_string)
            .or_else(|| state.cameras.first().map(|camera| camera.device_id.clone()));
        if state.camera {
            state.track = TrackState::Live;
        }
        Ok(MediaGrant { camera: state.camera, microphone: state.microphone, device_id })
    }

    fn release_media(&self) {
        let mut state = self.lock();
        state.media_releases += 1;
        if state.track != TrackState::Missing {
            state.track = TrackState::Ended;
        }
    }

    async fn request_fullscreen(&self) -> Result<(), CapabilityError> {
        let mut state = self.lock();
        state.fullscreen_requests += 1;
        if let Some(error) = state.fullscreen_error.clone() {
            return Err(error);
        }
        state.fullscreen = true;
        Ok(())
    }

    fn exit_fullscreen(&self) {
        let mut state = self.lock();
        state.fullscreen_exits += 1;
        state.fullscreen = false;
    }

    fn is_fullscreen(&self) -> bool {
        self.lock().fullscreen
    }

    fn video_track_state(&self) -> TrackState {
        self.lock().track
    }

    fn sample_luminance(&self) -> Option<f32> {
        self.lock().luminance
    }

    async fn list_cameras(&self) -> Result<Vec<CameraDevice>, CapabilityError> {
        Ok(self.lock().cameras.clone())
    }
}

/// Gateway used when no document store is configured: the record is only logged.
#[derive(Debug, Default)]
pub struct LocalGateway;

#[async_trait]
impl SubmissionGateway for LocalGateway {
    async fn append(&self, record: &SubmissionRecord) -> Result<(), GatewayError> {
        tracing::info!(
            session_id = %record.session_id,
            test_id = %record.test_id,
            "Document store not configured; record kept local"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ScriptedAction {
    Answer { index: usize, value: AnswerValue },
    Submit,
    FullscreenExit,
    FullscreenEnter,
    KeyPress { key: String },
    /// Camera unplugged: the track ends and reacquisition fails.
    CameraEnded,
    CameraCovered,
    CameraRestored,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptedStep {
    /// Seconds since the test started.
    pub at: u32,
    #[serde(flatten)]
    pub action: ScriptedAction,
}

/// A recorded attempt: who takes which test, on what host, doing what and when.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayScript {
    pub test_id: String,
    pub learner: LearnerIdentity,
    #[serde(default)]
    pub environment: HostProfile,
    #[serde(default)]
    pub events: Vec<ScriptedStep>,
}

impl ReplayScript {
    pub fn from_json(payload: &str) -> anyhow::Result<Self> {
        serde_json::from_str(payload).context("Invalid replay script")
    }
}

/// Drives a session second by second on a virtual clock.
///
/// Scripted steps for a second run before that second's tick; camera polls follow the
/// configured interval rounded up to whole seconds. Runs until some trigger submits,
/// which the countdown guarantees.
pub async fn replay(
    mut controller: SessionController,
    handle: &SessionHandle,
    env: &ScriptedEnvironment,
    script: &ReplayScript,
    camera_poll_seconds: u32,
) -> anyhow::Result<Outcome> {
    controller.consent(script.learner.clone()).context("Learner details rejected")?;
    controller.prepare().await.context("Failed to start the test")?;

    let mut steps = script.events.clone();
    steps.sort_by_key(|step| step.at);
    let mut steps = steps.into_iter().peekable();
    let poll_every = camera_poll_seconds.max(1);
    let mut reported_fullscreen = env.is_fullscreen();
    let mut second = 0u32;

    let ticket = 'session: loop {
        if let Some(ticket) = sync_host(&mut controller, env, &mut reported_fullscreen).await {
            break ticket;
        }

        while let Some(step) = steps.next_if(|step| step.at <= second) {
            if let Some(ticket) = apply(&mut controller, handle, env, step.action) {
                break 'session ticket;
            }
            if let Some(ticket) = sync_host(&mut controller, env, &mut reported_fullscreen).await
            {
                break 'session ticket;
            }
        }

        second += 1;
        if let Some(ticket) = controller.tick() {
            break ticket;
        }
        if second % poll_every == 0 {
            if let Some(ticket) = controller.poll_camera().await {
                break ticket;
            }
        }
    };

    tracing::info!(second, trigger = ticket.trigger().label(), "Replay reached submission");
    Ok(controller.finalize(ticket).await)
}

/// Lets background work (fullscreen re-requests) run, then reports any presentation change
/// the way a real host fires its change event.
async fn sync_host(
    controller: &mut SessionController,
    env: &ScriptedEnvironment,
    reported_fullscreen: &mut bool,
) -> Option<SubmissionTicket> {
    tokio::task::yield_now().await;

    let active = env.is_fullscreen();
    if active == *reported_fullscreen {
        return None;
    }
    *reported_fullscreen = active;
    controller.fullscreen_changed(active)
}

fn apply(
    controller: &mut SessionController,
    handle: &SessionHandle,
    env: &ScriptedEnvironment,
    action: ScriptedAction,
) -> Option<SubmissionTicket> {
    match action {
        ScriptedAction::Answer { index, value } => {
            if let Err(err) = controller.set_answer(index, value) {
                tracing::warn!(error = %err, "Scripted answer rejected");
            }
            None
        }
        ScriptedAction::Submit => controller.request_submit(),
        ScriptedAction::FullscreenExit => {
            env.set_fullscreen(false);
            None
        }
        ScriptedAction::FullscreenEnter => {
            env.set_fullscreen(true);
            None
        }
        ScriptedAction::KeyPress { key } => {
            let disposition = handle.intercept_key(KeyGesture::from_key(&key));
            tracing::debug!(key, ?disposition, "Scripted key press");
            controller.drain_pending()
        }
        ScriptedAction::CameraEnded => {
            env.set_track_state(TrackState::Ended);
            env.fail_media(CapabilityError::DeviceLost("unplugged".to_string()));
            None
        }
        ScriptedAction::CameraCovered => {
            env.set_luminance(Some(0.0));
            None
        }
        ScriptedAction::CameraRestored => {
            env.restore_media();
            env.set_track_state(TrackState::Live);
            env.set_luminance(Some(BRIGHT_FRAME));
            None
        }
    }
}
