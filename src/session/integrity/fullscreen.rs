use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::services::environment::Environment;

/// Tracks presentation mode and turns each exit into one violation.
#[derive(Debug, Default)]
pub(crate) struct FullscreenWatcher {
    attached: bool,
    active: bool,
    restore: Option<JoinHandle<()>>,
}

impl FullscreenWatcher {
    pub(crate) fn attach(&mut self) {
        self.attached = true;
        self.active = true;
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached
    }

    /// Records a presentation change reported by the host. Returns `true` for an exit;
    /// repeated exit notifications without an entry in between count once.
    pub(crate) fn observe(&mut self, active: bool) -> bool {
        if !self.attached {
            return false;
        }

        let exited = self.active && !active;
        self.active = active;
        exited
    }

    /// Re-requests fullscreen in the background. Hosts that demand a user gesture refuse,
    /// in which case the warning stays up until the learner re-enters by hand.
    pub(crate) fn restore(&mut self, env: Arc<dyn Environment>) {
        if !self.attached {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available to re-request fullscreen");
            return;
        };

        if let Some(previous) = self.restore.take() {
            previous.abort();
        }
        self.restore = Some(runtime.spawn(async move {
            if let Err(err) = env.request_fullscreen().await {
                tracing::warn!(error = %err, "Fullscreen re-request refused");
            }
        }));
    }

    pub(crate) fn detach(&mut self) {
        self.attached = false;
        if let Some(restore) = self.restore.take() {
            restore.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeEnvironment;

    #[test]
    fn counts_exits_not_duplicate_notifications() {
        let mut watcher = FullscreenWatcher::default();
        assert!(!watcher.observe(false), "detached watcher ignores changes");

        watcher.attach();
        assert!(watcher.observe(false));
        assert!(!watcher.observe(false));
        assert!(!watcher.observe(true));
        assert!(watcher.observe(false));

        watcher.detach();
        assert!(!watcher.observe(true));
        assert!(!watcher.observe(false));
    }

    #[tokio::test]
    async fn restore_re_requests_fullscreen() {
        let env = Arc::new(FakeEnvironment::granting_all());
        let mut watcher = FullscreenWatcher::default();
        watcher.attach();
        env.set_fullscreen(false);

        watcher.restore(env.clone());
        let handle = watcher.restore.take().expect("restore task");
        handle.await.expect("restore task completes");

        assert!(env.is_fullscreen());
        assert_eq!(env.fullscreen_requests(), 1);
    }

    #[tokio::test]
    async fn detach_cancels_pending_restore() {
        let env = Arc::new(FakeEnvironment::granting_all());
        let mut watcher = FullscreenWatcher::default();
        watcher.attach();
        env.set_fullscreen(false);

        watcher.restore(env.clone());
        watcher.detach();
        tokio::task::yield_now().await;

        assert!(!env.is_fullscreen());
        assert_eq!(env.fullscreen_requests(), 0);
    }
}
