use std::fmt;

use serde::Serialize;

use crate::core::config::ProctoringSettings;
use crate::services::environment::{Environment, TrackState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LossReason {
    TrackNotLive,
    DarkFrames,
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrackNotLive => f.write_str("video track is not live"),
            Self::DarkFrames => f.write_str("camera is covered or frozen"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CameraEvent {
    Reacquired { device_id: Option<String> },
    Lost { reason: LossReason },
    Restored,
}

/// Polls the preview track for liveness and tries to win the camera back when it drops.
#[derive(Debug)]
pub(crate) struct CameraWatcher {
    attached: bool,
    healthy: bool,
    dark_streak: u32,
    device_id: Option<String>,
    dark_frame_luma: f32,
    dark_frame_streak: u32,
    reacquire_attempts: u32,
}

impl CameraWatcher {
    pub(crate) fn new(settings: &ProctoringSettings) -> Self {
        Self {
            attached: false,
            healthy: false,
            dark_streak: 0,
            device_id: None,
            dark_frame_luma: settings.dark_frame_luma,
            dark_frame_streak: settings.dark_frame_streak,
            reacquire_attempts: settings.camera_reacquire_attempts,
        }
    }

    pub(crate) fn attach(&mut self, device_id: Option<String>) {
        self.attached = true;
        self.healthy = true;
        self.dark_streak = 0;
        self.device_id = device_id;
    }

    pub(crate) fn detach(&mut self) {
        self.attached = false;
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached
    }

    /// One liveness check. `Lost` is reported only on the healthy-to-lost edge, so a camera
    /// that stays down counts once.
    pub(crate) async fn probe(&mut self, env: &dyn Environment) -> Option<CameraEvent> {
        if !self.attached {
            return None;
        }

        let Some(reason) = self.check(env) else {
            if self.healthy {
                return None;
            }
            self.healthy = true;
            return Some(CameraEvent::Restored);
        };

        self.dark_streak = 0;
        tracing::warn!(reason = %reason, "Camera disconnected");
        if let Some(device_id) = self.reacquire(env).await {
            self.healthy = true;
            return Some(CameraEvent::Reacquired { device_id });
        }

        if !self.healthy {
            return None;
        }
        self.healthy = false;
        Some(CameraEvent::Lost { reason })
    }

    fn check(&mut self, env: &dyn Environment) -> Option<LossReason> {
        if env.video_track_state() != TrackState::Live {
            return Some(LossReason::TrackNotLive);
        }

        match env.sample_luminance() {
            Some(luma) if luma < self.dark_frame_luma => {
                self.dark_streak += 1;
                // A lost camera stays lost until a bright frame arrives.
                (!self.healthy || self.dark_streak >= self.dark_frame_streak)
                    .then_some(LossReason::DarkFrames)
            }
            _ => {
                self.dark_streak = 0;
                None
            }
        }
    }

    /// Alternates to another enumerated camera first, then falls back to the default one.
    async fn reacquire(&mut self, env: &dyn Environment) -> Option<Option<String>> {
        if self.reacquire_attempts == 0 {
            return None;
        }

        env.release_media();
        let alternative = match env.list_cameras().await {
            Ok(devices) => devices
                .into_iter()
                .map(|device| device.device_id)
                .find(|id| Some(id) != self.device_id.as_ref()),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to enumerate cameras");
                None
            }
        };

        let mut candidates = Vec::with_capacity(2);
        if alternative.is_some() {
            candidates.push(alternative);
        }
        candidates.push(None);

        for attempt in 0..self.reacquire_attempts {
            let index = usize::try_from(attempt).unwrap_or(usize::MAX);
            let device = candidates.get(index).or(candidates.last()).cloned().flatten();

            match env.acquire_media(device.as_deref()).await {
                Ok(grant) if grant.camera => {
                    crate::core::metrics::record_camera_reacquire("success");
                    self.device_id = grant.device_id.or(device);
                    tracing::info!(
                        attempt = attempt + 1,
                        device_id = self.device_id.as_deref().unwrap_or("default"),
                        "Camera reacquired"
                    );
                    return Some(self.device_id.clone());
                }
                Ok(_) => {
                    tracing::warn!(attempt = attempt + 1, "Camera reacquisition granted no video");
                }
                Err(err) => {
                    tracing::warn!(attempt = attempt + 1, error = %err, "Camera reacquisition failed");
                }
            }
        }

        crate::core::metrics::record_camera_reacquire("failed");
        None
    }
}
