mod camera;
mod fullscreen;
mod keys;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub use camera::LossReason;
pub(crate) use camera::CameraEvent;
pub use keys::{KeyDisposition, KeyGesture, KeyGuard};

use crate::core::config::ProctoringSettings;
use crate::schemas::submission::{ProctoringGrant, WatcherClass};
use crate::services::environment::Environment;
use camera::CameraWatcher;
use fullscreen::FullscreenWatcher;
use keys::KeyWatcher;

/// Strike rule shared by every watcher class: each class is counted on its own and
/// reaching the threshold in any one of them requests submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub threshold: u32,
    pub camera_strikes: bool,
}

impl EscalationPolicy {
    pub fn from_settings(settings: &ProctoringSettings) -> Self {
        Self {
            threshold: settings.violation_threshold,
            camera_strikes: settings.camera_counts_toward_threshold,
        }
    }

    pub fn counts(&self, class: WatcherClass) -> bool {
        class != WatcherClass::Camera || self.camera_strikes
    }

    pub fn breached(&self, class: WatcherClass, count: u32) -> bool {
        self.counts(class) && count >= self.threshold
    }

    /// Strikes left before auto-submit, or `None` for advisory classes.
    pub fn remaining(&self, class: WatcherClass, count: u32) -> Option<u32> {
        self.counts(class).then(|| self.threshold.saturating_sub(count))
    }
}

/// Sole owner of the camera and fullscreen resources for one session.
///
/// Resources are released on every exit path: explicitly when submission starts and
/// again on drop for abandoned sessions. Release is idempotent.
pub(crate) struct IntegrityMonitor {
    env: Arc<dyn Environment>,
    fullscreen: FullscreenWatcher,
    camera: CameraWatcher,
    keys: KeyWatcher,
    media_held: bool,
    released: bool,
}

impl IntegrityMonitor {
    pub(crate) fn new(
        env: Arc<dyn Environment>,
        settings: &ProctoringSettings,
        armed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            env,
            fullscreen: FullscreenWatcher::default(),
            camera: CameraWatcher::new(settings),
            keys: KeyWatcher::new(armed),
            media_held: false,
            released: false,
        }
    }

    /// Requests camera, microphone and fullscreen, then attaches the watchers whose
    /// capability was granted. Refusals degrade proctoring instead of failing.
    pub(crate) async fn engage(&mut self) -> ProctoringGrant {
        let mut grant = ProctoringGrant::default();

        match self.env.acquire_media(None).await {
            Ok(media) => {
                self.media_held = true;
                grant.camera = media.camera;
                grant.microphone = media.microphone;
                if media.camera {
                    self.camera.attach(media.device_id);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Camera and microphone access not granted");
            }
        }

        match self.env.request_fullscreen().await {
            Ok(()) => {
                grant.fullscreen = true;
                self.fullscreen.attach();
            }
            Err(err) => {
                tracing::warn!(error = %err, "Fullscreen not granted");
            }
        }

        self.keys.attach();
        grant
    }

    /// Returns `true` when the change is an exit that counts as a violation.
    pub(crate) fn fullscreen_changed(&mut self, active: bool) -> bool {
        self.fullscreen.observe(active)
    }

    pub(crate) fn restore_fullscreen(&mut self) {
        self.fullscreen.restore(Arc::clone(&self.env));
    }

    pub(crate) fn camera_attached(&self) -> bool {
        self.camera.is_attached()
    }

    pub(crate) fn fullscreen_attached(&self) -> bool {
        self.fullscreen.is_attached()
    }

    pub(crate) async fn probe_camera(&mut self) -> Option<CameraEvent> {
        self.camera.probe(self.env.as_ref()).await
    }

    /// Stops all three watchers. Nothing they observe afterwards reaches the session.
    pub(crate) fn detach(&mut self) {
        self.keys.detach();
        self.fullscreen.detach();
        self.camera.detach();
    }

    pub(crate) fn release(&mut self) {
        self.detach();
        if self.released {
            return;
        }
        self.released = true;

        if self.media_held {
            self.env.release_media();
        }
        if self.env.is_fullscreen() {
            self.env.exit_fullscreen();
        }
        tracing::debug!("Proctoring resources released");
    }
}

impl Drop for IntegrityMonitor {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::environment::CapabilityError;
    use crate::test_support::FakeEnvironment;

    fn monitor(env: &Arc<FakeEnvironment>) -> (IntegrityMonitor, Arc<AtomicBool>) {
        let armed = Arc::new(AtomicBool::new(false));
        let env: Arc<dyn Environment> = env.clone();
        let monitor = IntegrityMonitor::new(env, &ProctoringSettings::default(), armed.clone());
        (monitor, armed)
    }

    #[test]
    fn policy_counts_classes_independently() {
        let policy = EscalationPolicy::from_settings(&ProctoringSettings::default());

        assert!(!policy.breached(WatcherClass::Fullscreen, 2));
        assert!(policy.breached(WatcherClass::Fullscreen, 3));
        assert!(policy.breached(WatcherClass::KeySuppression, 4));
        assert!(!policy.breached(WatcherClass::Camera, 10));
        assert_eq!(policy.remaining(WatcherClass::KeySuppression, 1), Some(2));
        assert_eq!(policy.remaining(WatcherClass::Camera, 1), None);

        let strict = EscalationPolicy { threshold: 3, camera_strikes: true };
        assert!(strict.breached(WatcherClass::Camera, 3));
    }

    #[tokio::test]
    async fn engage_attaches_granted_watchers() {
        let env = Arc::new(FakeEnvironment::granting_all());
        let (mut monitor, armed) = monitor(&env);

        let grant = monitor.engage().await;

        assert_eq!(grant, ProctoringGrant { camera: true, microphone: true, fullscreen: true });
        assert!(monitor.camera_attached());
        assert!(monitor.fullscreen_attached());
        assert!(armed.load(std::sync::atomic::Ordering::Acquire));
    }

    #[tokio::test]
    async fn engage_degrades_when_capabilities_are_refused() {
        let env = Arc::new(FakeEnvironment::granting_all());
        env.fail_media(CapabilityError::Denied("camera blocked".to_string()));
        env.refuse_fullscreen(CapabilityError::GestureRequired);
        let (mut monitor, armed) = monitor(&env);

        let grant = monitor.engage().await;

        assert_eq!(grant, ProctoringGrant::default());
        assert!(!monitor.camera_attached());
        assert!(!monitor.fullscreen_changed(false));
        assert!(armed.load(std::sync::atomic::Ordering::Acquire));

        monitor.release();
        assert_eq!(env.media_releases(), 0);
    }

    #[tokio::test]
    async fn release_stops_media_and_leaves_fullscreen_once() {
        let env = Arc::new(FakeEnvironment::granting_all());
        let (mut monitor, armed) = monitor(&env);
        monitor.engage().await;

        monitor.release();
        monitor.release();
        drop(monitor);

        assert_eq!(env.media_releases(), 1);
        assert_eq!(env.fullscreen_exits(), 1);
        assert!(!env.is_fullscreen());
        assert!(!armed.load(std::sync::atomic::Ordering::Acquire));
    }

    #[tokio::test]
    async fn drop_releases_abandoned_resources() {
        let env = Arc::new(FakeEnvironment::granting_all());
        let (mut monitor, _armed) = monitor(&env);
        monitor.engage().await;

        drop(monitor);

        assert_eq!(env.media_releases(), 1);
        assert!(!env.is_fullscreen());
    }
}
