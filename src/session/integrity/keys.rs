use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::session::controller::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGesture {
    Escape,
    Other,
}

impl KeyGesture {
    /// Maps a DOM-style key name.
    pub fn from_key(key: &str) -> Self {
        match key {
            "Escape" | "Esc" => Self::Escape,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDisposition {
    /// Swallow the gesture; the host must not apply its default action.
    Suppress,
    PassThrough,
}

/// Input hook installed by the host in front of its own key handling.
///
/// While armed, escape is suppressed and reported to the controller as a violation.
#[derive(Debug, Clone)]
pub struct KeyGuard {
    armed: Arc<AtomicBool>,
    events: UnboundedSender<SessionEvent>,
}

impl KeyGuard {
    pub(crate) fn new(armed: Arc<AtomicBool>, events: UnboundedSender<SessionEvent>) -> Self {
        Self { armed, events }
    }

    pub fn intercept(&self, gesture: KeyGesture) -> KeyDisposition {
        if gesture != KeyGesture::Escape || !self.armed.load(Ordering::Acquire) {
            return KeyDisposition::PassThrough;
        }

        if self.events.send(SessionEvent::KeySuppressed).is_err() {
            tracing::debug!("Escape suppressed after the session loop stopped");
        }
        KeyDisposition::Suppress
    }
}

/// Controller-side switch for the guard. The session arms it on going live and disarms it
/// the instant submission starts.
#[derive(Debug)]
pub(crate) struct KeyWatcher {
    armed: Arc<AtomicBool>,
}

impl KeyWatcher {
    pub(crate) fn new(armed: Arc<AtomicBool>) -> Self {
        Self { armed }
    }

    pub(crate) fn attach(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub(crate) fn detach(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn escape_is_suppressed_only_while_armed() {
        let armed = Arc::new(AtomicBool::new(false));
        let (events, mut inbox) = mpsc::unbounded_channel();
        let guard = KeyGuard::new(Arc::clone(&armed), events);
        let watcher = KeyWatcher::new(armed);

        assert_eq!(guard.intercept(KeyGesture::Escape), KeyDisposition::PassThrough);

        watcher.attach();
        assert_eq!(guard.intercept(KeyGesture::from_key("Escape")), KeyDisposition::Suppress);
        assert_eq!(guard.intercept(KeyGesture::from_key("Enter")), KeyDisposition::PassThrough);
        assert!(matches!(inbox.try_recv(), Ok(SessionEvent::KeySuppressed)));
        assert!(inbox.try_recv().is_err());

        watcher.detach();
        assert_eq!(guard.intercept(KeyGesture::Escape), KeyDisposition::PassThrough);
        assert!(inbox.try_recv().is_err());
    }

    #[test]
    fn suppression_survives_a_stopped_session() {
        let armed = Arc::new(AtomicBool::new(true));
        let (events, inbox) = mpsc::unbounded_channel();
        drop(inbox);

        let guard = KeyGuard::new(armed, events);
        assert_eq!(guard.intercept(KeyGesture::Escape), KeyDisposition::Suppress);
    }
}
